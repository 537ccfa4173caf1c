//! The routing context and its event loop
//!
//! [`Router`] owns the stream registry, the route controller and the virtual
//! microphone. It runs on one thread and is the only place where any of them
//! is mutated. External commands run on short-lived worker threads and report
//! back by posting a [`RouterEvent`] into the same queue, so a slow `pw-dump`
//! or `pw-link` never holds up notifications or selections.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::backend::GraphBackend;
use super::device::VirtualDevice;
use super::graph::{NodeSelector, resolve_channel_ports};
use super::registry::{ResolveOutcome, ResolveRequest, StreamRegistry};
use super::route::{LinkAction, OpOutcome, PortOp, RouteController};
use super::types::{
    AudioEvent, ChannelPorts, PortDirection, RouteState, StreamEntry, StreamId, StreamInfo,
};

/// Everything the router reacts to
#[derive(Debug)]
pub enum RouterEvent {
    /// A node appeared in the PipeWire registry
    StreamAdded(StreamInfo),
    /// A node left the PipeWire registry
    StreamRemoved(StreamId),
    /// The user picked a stream
    Select(StreamId),
    /// Re-publish the current state
    Refresh,
    /// A stream's port lookup finished
    PortsResolved {
        request: ResolveRequest,
        ports: Option<ChannelPorts>,
    },
    /// Virtual microphone creation finished
    DeviceCreated(Result<VirtualDevice, String>),
    /// Lookup of the virtual microphone's input ports finished
    DestinationResolved {
        attempt: u32,
        ports: Option<ChannelPorts>,
    },
    /// A [`PortOp`] finished
    OpCompleted {
        outcome: OpOutcome,
        errors: Vec<String>,
    },
    /// The virtual microphone was unloaded (or unloading failed)
    DeviceDestroyed,
    /// The PipeWire registry watcher stopped with an error
    ClientFailed(String),
    /// Tear everything down and stop the loop
    Shutdown,
}

/// Knobs for the router, taken from the config file
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub device_name: String,
    pub device_description: String,
    /// Lookups allowed after a failed first one
    pub retries: u32,
    pub retry_delay: Duration,
    pub ignored_names: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            device_name: "VirtualMic".to_string(),
            device_description: "Virtual Microphone".to_string(),
            retries: 5,
            retry_delay: Duration::from_millis(200),
            ignored_names: Vec::new(),
        }
    }
}

pub struct Router {
    registry: StreamRegistry,
    controller: RouteController,
    device: Option<VirtualDevice>,
    backend: Arc<dyn GraphBackend>,
    settings: RouterSettings,
    /// Completions from worker threads come back through here
    router_tx: Sender<RouterEvent>,
    ui_tx: Sender<AudioEvent>,
    creating_device: bool,
    destroying_device: bool,
    shutting_down: bool,
    finished: bool,
    published_streams: Vec<StreamEntry>,
    published_route: (RouteState, Option<StreamId>),
}

impl Router {
    pub fn new(
        backend: Arc<dyn GraphBackend>,
        settings: RouterSettings,
        router_tx: Sender<RouterEvent>,
        ui_tx: Sender<AudioEvent>,
    ) -> Self {
        Self {
            registry: StreamRegistry::new(settings.retries, settings.ignored_names.clone()),
            controller: RouteController::new(),
            device: None,
            backend,
            settings,
            router_tx,
            ui_tx,
            creating_device: false,
            destroying_device: false,
            shutting_down: false,
            finished: false,
            published_streams: Vec::new(),
            published_route: (RouteState::Idle, None),
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &RouteController {
        &self.controller
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Kick off creation of the virtual microphone
    pub fn start(&mut self) {
        let name = self.settings.device_name.clone();
        let description = self.settings.device_description.clone();
        self.creating_device = true;

        self.spawn(Duration::ZERO, move |backend| {
            RouterEvent::DeviceCreated(
                VirtualDevice::create(backend, &name, &description).map_err(|e| e.to_string()),
            )
        });
    }

    /// Start the device, then process events until shutdown completes
    pub fn run(mut self, router_rx: Receiver<RouterEvent>) {
        info!("Router started");
        self.start();

        while let Ok(event) = router_rx.recv() {
            self.handle(event);
            if self.finished {
                break;
            }
        }

        info!("Router stopped");
    }

    /// Process one event
    pub fn handle(&mut self, event: RouterEvent) {
        debug!("Router event: {:?}", event);

        match event {
            RouterEvent::StreamAdded(info) => {
                // The old owner of a reused id loses its route first
                if self.registry.evict_previous_owner(&info).is_some() {
                    let op = self.controller.on_stream_removed(info.id);
                    self.dispatch(op);
                }
                if let Some(request) = self.registry.on_stream_added(info) {
                    self.spawn_resolve(request, Duration::ZERO);
                }
            }
            RouterEvent::StreamRemoved(id) => {
                if self.registry.on_stream_removed(id).is_some() {
                    let op = self.controller.on_stream_removed(id);
                    self.dispatch(op);
                }
            }
            RouterEvent::Select(id) => {
                let op = self.controller.select(id, &self.registry);
                self.dispatch(op);
            }
            RouterEvent::Refresh => self.publish_all(),
            RouterEvent::PortsResolved { request, ports } => {
                match self.registry.on_ports_resolved(request, ports) {
                    ResolveOutcome::Retry(next) => {
                        self.spawn_resolve(next, self.settings.retry_delay)
                    }
                    ResolveOutcome::Unroutable => {
                        if let Some(stream) = self.registry.get(request.id) {
                            let _ = self.ui_tx.send(AudioEvent::Status {
                                message: format!("{} has no stereo output", stream.label()),
                            });
                        }
                    }
                    ResolveOutcome::Resolved(_) | ResolveOutcome::Dropped => {}
                }
            }
            RouterEvent::DeviceCreated(result) => self.on_device_created(result),
            RouterEvent::DestinationResolved { attempt, ports } => {
                self.on_destination_resolved(attempt, ports)
            }
            RouterEvent::OpCompleted { outcome, errors } => {
                for message in errors {
                    let _ = self.ui_tx.send(AudioEvent::Error { message });
                }
                let op = self.controller.on_op_complete(outcome, &self.registry);
                self.dispatch(op);
            }
            RouterEvent::DeviceDestroyed => {
                self.destroying_device = false;
            }
            RouterEvent::ClientFailed(message) => {
                let _ = self.ui_tx.send(AudioEvent::Error { message });
            }
            RouterEvent::Shutdown => {
                info!("Shutting down route");
                self.shutting_down = true;
                let op = self.controller.shutdown();
                self.dispatch(op);
            }
        }

        if self.shutting_down {
            self.advance_shutdown();
        }
        self.publish();
    }

    fn on_device_created(&mut self, result: Result<VirtualDevice, String>) {
        self.creating_device = false;

        match result {
            Ok(device) => {
                self.device = Some(device);
                if !self.shutting_down {
                    self.spawn_destination_lookup(1, Duration::ZERO);
                }
            }
            Err(message) => {
                error!("Failed to create virtual microphone: {}", message);
                let _ = self.ui_tx.send(AudioEvent::Error {
                    message: format!("Failed to create virtual microphone: {}", message),
                });
            }
        }
    }

    fn on_destination_resolved(&mut self, attempt: u32, ports: Option<ChannelPorts>) {
        if self.shutting_down || self.device.is_none() {
            return;
        }

        match ports {
            Some(ports) => {
                let _ = self.ui_tx.send(AudioEvent::VirtualMicReady {
                    name: self.settings.device_name.clone(),
                });
                let op = self.controller.set_destination(ports, &self.registry);
                self.dispatch(op);
            }
            None if attempt <= self.settings.retries => self.spawn_destination_lookup(
                attempt.saturating_add(1),
                self.settings.retry_delay,
            ),
            None => {
                error!("Virtual microphone exposes no stereo input ports");
                let _ = self.ui_tx.send(AudioEvent::Error {
                    message: "Virtual microphone exposes no stereo input ports".to_string(),
                });
            }
        }
    }

    /// Unload the device once the route is down; finish once that is done
    fn advance_shutdown(&mut self) {
        if !self.controller.is_settled() || self.creating_device || self.destroying_device {
            return;
        }

        match self.device.take() {
            Some(device) => {
                self.destroying_device = true;
                self.spawn(Duration::ZERO, move |backend| {
                    if let Err(e) = device.destroy(backend) {
                        warn!("Failed to destroy virtual microphone: {}", e);
                    }
                    RouterEvent::DeviceDestroyed
                });
            }
            None => self.finished = true,
        }
    }

    fn dispatch(&mut self, op: Option<PortOp>) {
        let Some(op) = op else {
            return;
        };

        debug!("Dispatching {:?} for {}", op.action, op.stream_id);
        self.spawn(Duration::ZERO, move |backend| {
            let mut outcome = OpOutcome::none();
            let mut errors = Vec::new();

            for link in &op.links {
                let result = match op.action {
                    LinkAction::Link => backend.link(link.output, link.input),
                    LinkAction::Unlink => backend.unlink(link.output, link.input),
                };
                match result {
                    Ok(()) => outcome.succeeded.push(*link),
                    Err(e) => {
                        warn!("{:?} {} -> {} failed: {}", op.action, link.output, link.input, e);
                        errors.push(e.to_string());
                    }
                }
            }

            RouterEvent::OpCompleted { outcome, errors }
        });
    }

    fn spawn_resolve(&self, request: ResolveRequest, delay: Duration) {
        self.spawn(delay, move |backend| {
            let ports = match backend.dump_graph() {
                Ok(snapshot) => resolve_channel_ports(
                    &snapshot,
                    NodeSelector::Serial(request.serial),
                    PortDirection::Output,
                ),
                Err(e) => {
                    warn!("Graph dump for {} failed: {}", request.id, e);
                    None
                }
            };
            RouterEvent::PortsResolved { request, ports }
        });
    }

    fn spawn_destination_lookup(&self, attempt: u32, delay: Duration) {
        let Some(device) = self.device.clone() else {
            return;
        };

        self.spawn(delay, move |backend| {
            let ports = device.resolve_inputs(backend).unwrap_or_else(|e| {
                warn!("Graph dump for virtual microphone failed: {}", e);
                None
            });
            RouterEvent::DestinationResolved { attempt, ports }
        });
    }

    /// Run `job` off the router thread and post its result back
    fn spawn<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce(&dyn GraphBackend) -> RouterEvent + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let router_tx = self.router_tx.clone();

        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let event = job(backend.as_ref());
            // The router may already be gone during shutdown
            let _ = router_tx.send(event);
        });
    }

    /// Send the full state regardless of what the UI has seen
    fn publish_all(&mut self) {
        self.published_route = (self.controller.state(), self.controller.active_stream());
        self.published_streams = self.registry.entries(self.controller.selected());

        let _ = self.ui_tx.send(AudioEvent::RouteChanged {
            state: self.published_route.0,
            stream_id: self.published_route.1,
        });
        let _ = self.ui_tx.send(AudioEvent::StreamsChanged {
            streams: self.published_streams.clone(),
        });
    }

    fn publish(&mut self) {
        let route = (self.controller.state(), self.controller.active_stream());
        if route != self.published_route {
            self.published_route = route;
            let _ = self.ui_tx.send(AudioEvent::RouteChanged {
                state: route.0,
                stream_id: route.1,
            });
        }

        let streams = self.registry.entries(self.controller.selected());
        if streams != self.published_streams {
            self.published_streams = streams.clone();
            let _ = self.ui_tx.send(AudioEvent::StreamsChanged { streams });
        }
    }
}
