pub mod backend;
pub mod client;
pub mod device;
pub mod graph;
pub mod registry;
pub mod route;
pub mod router;
pub mod types;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

pub use backend::{CommandBackend, CommandSet, GraphBackend};
pub use client::PipeWireClient;
pub use router::{Router, RouterEvent, RouterSettings};
pub use types::{AudioCommand, AudioEvent, RouteState, StreamEntry, StreamId};

/// Front end of the routing engine, driven by the UI
pub struct AudioEngine {
    router_tx: Sender<RouterEvent>,
    router_rx: Option<Receiver<RouterEvent>>,
    event_rx: Receiver<AudioEvent>,
    event_tx: Sender<AudioEvent>,
    backend: Arc<dyn GraphBackend>,
    settings: RouterSettings,
    client: PipeWireClient,
    router_thread: Option<JoinHandle<()>>,
}

impl AudioEngine {
    pub fn new(backend: Arc<dyn GraphBackend>, settings: RouterSettings) -> Result<Self> {
        let (router_tx, router_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        Ok(Self {
            client: PipeWireClient::new(router_tx.clone()),
            router_tx,
            router_rx: Some(router_rx),
            event_rx,
            event_tx,
            backend,
            settings,
            router_thread: None,
        })
    }

    /// Create the virtual microphone and start watching streams
    pub fn start(&mut self) -> Result<()> {
        self.start_router()?;
        self.client.activate()?;
        Ok(())
    }

    fn start_router(&mut self) -> Result<()> {
        let router_rx = self
            .router_rx
            .take()
            .context("Audio engine already started")?;

        let router = Router::new(
            Arc::clone(&self.backend),
            self.settings.clone(),
            self.router_tx.clone(),
            self.event_tx.clone(),
        );
        let router_thread = thread::Builder::new()
            .name("router".to_string())
            .spawn(move || router.run(router_rx))
            .context("Failed to spawn router thread")?;
        self.router_thread = Some(router_thread);
        Ok(())
    }

    /// Tear the route down and remove the virtual microphone
    pub fn stop(&mut self) -> Result<()> {
        // No new notifications once the router starts shutting down
        let client_result = self.client.deactivate();
        if let Err(e) = &client_result {
            warn!("Failed to stop PipeWire client: {:#}", e);
        }

        // The route and the device go away even if the client died
        if let Some(handle) = self.router_thread.take() {
            self.router_tx
                .send(RouterEvent::Shutdown)
                .context("Router thread is gone")?;
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("Router thread panicked"))?;
        }

        client_result
    }

    /// Forward a UI command to the router
    pub fn send_command(&self, command: AudioCommand) -> Result<()> {
        let event = match command {
            AudioCommand::Select { stream_id } => RouterEvent::Select(stream_id),
            AudioCommand::Refresh => RouterEvent::Refresh,
        };
        self.router_tx
            .send(event)
            .context("Failed to send command to router")
    }

    /// Drain pending events without blocking
    pub fn poll_events(&self) -> Vec<AudioEvent> {
        self.event_rx.try_iter().collect()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
