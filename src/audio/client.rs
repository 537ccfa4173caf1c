use anyhow::{Context, Result};
use crossbeam_channel::{Sender, unbounded};
use pipewire::{context::ContextRc, main_loop::MainLoopRc, node::Node, types::ObjectType};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use super::router::RouterEvent;
use super::types::{StreamId, StreamInfo};

// Thread-local storage at module level for PipeWire objects
// Node proxies are Rc-based and must stay on the PipeWire thread
thread_local! {
    static NODES: RefCell<HashMap<u32, (Node, Box<dyn Any>)>> = RefCell::new(HashMap::new());
    static ANNOUNCED: RefCell<HashSet<u32>> = RefCell::new(HashSet::new());
}

/// Watches the PipeWire registry and reports stream nodes to the router
pub struct PipeWireClient {
    /// Where stream-added/removed notifications go
    router_tx: Sender<RouterEvent>,
    /// Thread handle for PipeWire event loop
    event_thread: Option<JoinHandle<()>>,
    /// Channel for signaling event loop thread to quit
    quit_tx: Option<Sender<()>>,
    /// Track if client is activated
    is_activated: bool,
}

impl PipeWireClient {
    pub fn new(router_tx: Sender<RouterEvent>) -> Self {
        Self {
            router_tx,
            event_thread: None,
            quit_tx: None,
            is_activated: false,
        }
    }

    /// Connect to PipeWire and start forwarding stream notifications
    pub fn activate(&mut self) -> Result<()> {
        if self.is_activated {
            return Ok(());
        }

        let (quit_tx, quit_rx) = unbounded::<()>();
        let router_tx = self.router_tx.clone();

        // All PipeWire objects must be created and owned by this thread
        // since they use Rc (not thread-safe)
        let event_thread = thread::Builder::new()
            .name("pipewire".to_string())
            .spawn(move || {
                pipewire::init();

                let failure_tx = router_tx.clone();
                if let Err(e) = Self::run_loop(router_tx, quit_rx) {
                    error!("PipeWire event loop failed: {:#}", e);
                    let _ = failure_tx.send(RouterEvent::ClientFailed(format!(
                        "PipeWire connection failed: {:#}",
                        e
                    )));
                }

                unsafe {
                    pipewire::deinit();
                }
            })
            .context("Failed to spawn PipeWire thread")?;

        self.quit_tx = Some(quit_tx);
        self.event_thread = Some(event_thread);
        self.is_activated = true;

        Ok(())
    }

    /// Stop the PipeWire loop and wait for its thread
    pub fn deactivate(&mut self) -> Result<()> {
        if !self.is_activated {
            return Ok(());
        }

        // A panicked thread cannot be joined twice; never retry
        self.is_activated = false;

        if let Some(quit_tx) = self.quit_tx.take() {
            let _ = quit_tx.send(());
        }

        if let Some(handle) = self.event_thread.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("PipeWire thread panicked"))?;
        }

        Ok(())
    }

    /// Treat `event_thread` as the running PipeWire loop
    #[cfg(test)]
    pub(super) fn adopt_thread(&mut self, event_thread: JoinHandle<()>) {
        self.event_thread = Some(event_thread);
        self.is_activated = true;
    }

    fn run_loop(
        router_tx: Sender<RouterEvent>,
        quit_rx: crossbeam_channel::Receiver<()>,
    ) -> Result<()> {
        let main_loop = MainLoopRc::new(None).context("Failed to create PipeWire main loop")?;
        let context =
            ContextRc::new(&main_loop, None).context("Failed to create PipeWire context")?;
        let core = context
            .connect_rc(None)
            .context("Failed to connect to PipeWire daemon")?;
        let registry = core.get_registry_rc().context("Failed to get registry")?;

        // Weak reference to registry for use in closures
        let registry_weak = registry.downgrade();
        let router_tx_global = router_tx.clone();
        let router_tx_remove = router_tx;

        let registry_listener = registry
            .add_listener_local()
            .global(move |obj| {
                if obj.type_ != ObjectType::Node {
                    return;
                }

                // Skip devices early; only stream nodes are worth binding
                let media_class = obj.props.and_then(|p| p.get("media.class"));
                if media_class.is_some_and(|class| !class.starts_with("Stream/")) {
                    return;
                }

                if let Some(registry) = registry_weak.upgrade() {
                    Self::bind_node(&registry, &router_tx_global, obj);
                }
            })
            .global_remove(move |id| {
                NODES.with(|nodes| nodes.borrow_mut().remove(&id));

                let announced = ANNOUNCED.with(|announced| announced.borrow_mut().remove(&id));
                if announced {
                    let _ = router_tx_remove.send(RouterEvent::StreamRemoved(StreamId::new(id)));
                }
            })
            .register();

        // Poll the quit channel; MainLoopRc cannot be signalled from another thread
        let main_loop_quit = main_loop.clone();
        let timer_source = main_loop.loop_().add_timer(move |_expirations| {
            if !matches!(
                quit_rx.try_recv(),
                Err(crossbeam_channel::TryRecvError::Empty)
            ) {
                main_loop_quit.quit();
            }
        });

        timer_source.update_timer(
            Some(Duration::from_millis(50)),
            Some(Duration::from_millis(50)),
        );

        info!("Connected to PipeWire");

        // Run the main loop (blocks until quit is called)
        main_loop.run();

        NODES.with(|nodes| nodes.borrow_mut().clear());
        ANNOUNCED.with(|announced| announced.borrow_mut().clear());

        // Keep objects alive until the loop ends
        drop(timer_source);
        drop(registry_listener);
        drop(registry);
        drop(core);
        drop(context);

        info!("Disconnected from PipeWire");
        Ok(())
    }

    /// Bind a node proxy and announce it once its properties arrive
    fn bind_node(
        registry: &pipewire::registry::RegistryRc,
        router_tx: &Sender<RouterEvent>,
        obj: &pipewire::registry::GlobalObject<&pipewire::spa::utils::dict::DictRef>,
    ) {
        let global_id = obj.id;
        let global_serial = obj
            .props
            .and_then(|p| p.get("object.serial"))
            .and_then(|s| s.parse::<u64>().ok());

        let node: Node = match registry.bind(obj) {
            Ok(node) => node,
            Err(e) => {
                debug!("Failed to bind node {}: {}", global_id, e);
                return;
            }
        };

        let router_tx = router_tx.clone();
        let listener = node
            .add_listener_local()
            .info(move |info| {
                let Some(props) = info.props() else {
                    return;
                };

                // Info is re-emitted on every change; announce only once
                if ANNOUNCED.with(|announced| announced.borrow().contains(&global_id)) {
                    return;
                }

                let media_class = props.get("media.class").unwrap_or("");
                if !media_class.starts_with("Stream/") {
                    return;
                }

                let Some(serial) = props
                    .get("object.serial")
                    .and_then(|s| s.parse::<u64>().ok())
                    .or(global_serial)
                else {
                    debug!("Node {} has no object.serial", global_id);
                    return;
                };

                let name = props
                    .get("application.name")
                    .or_else(|| props.get("node.name"))
                    .unwrap_or("Unknown Application")
                    .trim()
                    .to_string();
                let description = props
                    .get("media.name")
                    .or_else(|| props.get("node.description"))
                    .unwrap_or("")
                    .trim()
                    .to_string();

                let stream = StreamInfo {
                    id: StreamId::new(global_id),
                    serial,
                    name,
                    description,
                    media_class: media_class.to_string(),
                    media_role: props.get("media.role").map(str::to_string),
                };

                ANNOUNCED.with(|announced| announced.borrow_mut().insert(global_id));
                let _ = router_tx.send(RouterEvent::StreamAdded(stream));
            })
            .register();

        // Store node and listener to keep them alive
        NODES.with(|nodes| {
            nodes
                .borrow_mut()
                .insert(global_id, (node, Box::new(listener) as Box<dyn Any>))
        });
    }
}

impl Drop for PipeWireClient {
    fn drop(&mut self) {
        // Ensure clean shutdown
        let _ = self.deactivate();
    }
}
