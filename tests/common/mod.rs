//! Shared helpers for router integration tests

#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use virtmic::audio::backend::{BackendError, BackendResult, GraphBackend, ModuleId};
use virtmic::audio::graph::PortGraphSnapshot;
use virtmic::audio::registry::APPLICATION_OUTPUT_CLASS;
use virtmic::audio::types::{AudioEvent, PortId, StreamId, StreamInfo};
use virtmic::audio::{Router, RouterEvent, RouterSettings};

pub const MODULE: ModuleId = ModuleId(77);

/// External call observed by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Link(u32, u32),
    Unlink(u32, u32),
    Load(String),
    Unload(u32),
}

/// A node with a stereo port pair, visible from the `visible_from`-th dump on
#[derive(Debug, Clone)]
struct MockNode {
    node_id: u32,
    serial: u64,
    module_id: Option<u32>,
    direction: &'static str,
    ports: (u32, u32),
    visible_from: usize,
}

/// In-memory graph that records every external call
#[derive(Default)]
pub struct MockBackend {
    nodes: Mutex<Vec<MockNode>>,
    calls: Mutex<Vec<Call>>,
    dumps: AtomicUsize,
    failing_links: Mutex<Vec<(u32, u32)>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.nodes.lock().unwrap().push(MockNode {
            node_id: 900,
            serial: 9000,
            module_id: Some(MODULE.0),
            direction: "input",
            ports: (1, 2),
            visible_from: 1,
        });
        Arc::new(backend)
    }

    /// Add a stream node whose output ports appear from dump number `visible_from`
    pub fn add_stream(&self, node_id: u32, serial: u64, ports: (u32, u32), visible_from: usize) {
        self.nodes.lock().unwrap().push(MockNode {
            node_id,
            serial,
            module_id: None,
            direction: "output",
            ports,
            visible_from,
        });
    }

    /// Drop a node and its ports from later dumps
    pub fn remove_stream(&self, node_id: u32) {
        self.nodes.lock().unwrap().retain(|node| node.node_id != node_id);
    }

    pub fn fail_link(&self, output: u32, input: u32) {
        self.failing_links.lock().unwrap().push((output, input));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Link/unlink calls only
    pub fn link_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Link(..) | Call::Unlink(..)))
            .collect()
    }

    pub fn dump_count(&self) -> usize {
        self.dumps.load(Ordering::SeqCst)
    }

    fn graph_json(&self, dump: usize) -> Value {
        let mut objects = Vec::new();
        for node in self.nodes.lock().unwrap().iter() {
            let mut props = json!({ "object.serial": node.serial });
            if let Some(module_id) = node.module_id {
                props["pulse.module.id"] = json!(module_id.to_string());
            }
            objects.push(json!({
                "id": node.node_id,
                "type": "PipeWire:Interface:Node",
                "info": { "props": props }
            }));

            if dump < node.visible_from {
                continue;
            }
            for (port_id, channel) in [(node.ports.0, "FL"), (node.ports.1, "FR")] {
                objects.push(json!({
                    "id": port_id,
                    "type": "PipeWire:Interface:Port",
                    "info": {
                        "direction": node.direction,
                        "props": { "node.id": node.node_id, "audio.channel": channel }
                    }
                }));
            }
        }
        Value::Array(objects)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl GraphBackend for MockBackend {
    fn dump_graph(&self) -> BackendResult<PortGraphSnapshot> {
        let dump = self.dumps.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PortGraphSnapshot::from_value(&self.graph_json(dump)))
    }

    fn link(&self, output: PortId, input: PortId) -> BackendResult<()> {
        self.record(Call::Link(output.0, input.0));
        if self
            .failing_links
            .lock()
            .unwrap()
            .contains(&(output.0, input.0))
        {
            return Err(BackendError::Failed {
                program: "pw-link".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "failed to link ports: File exists".to_string(),
            });
        }
        Ok(())
    }

    fn unlink(&self, output: PortId, input: PortId) -> BackendResult<()> {
        self.record(Call::Unlink(output.0, input.0));
        Ok(())
    }

    fn load_virtual_sink(&self, name: &str, _description: &str) -> BackendResult<ModuleId> {
        self.record(Call::Load(name.to_string()));
        Ok(MODULE)
    }

    fn unload_virtual_sink(&self, module: ModuleId) -> BackendResult<()> {
        self.record(Call::Unload(module.0));
        Ok(())
    }
}

/// Router wired to a mock backend, driven event by event from the test thread
pub struct Harness {
    pub router: Router,
    pub backend: Arc<MockBackend>,
    pub router_tx: Sender<RouterEvent>,
    router_rx: Receiver<RouterEvent>,
    pub ui_rx: Receiver<AudioEvent>,
}

impl Harness {
    pub fn new(backend: Arc<MockBackend>, settings: RouterSettings) -> Self {
        let (router_tx, router_rx) = unbounded();
        let (ui_tx, ui_rx) = unbounded();
        let router = Router::new(backend.clone(), settings, router_tx.clone(), ui_tx);

        Self {
            router,
            backend,
            router_tx,
            router_rx,
            ui_rx,
        }
    }

    /// Start the router and wait for the destination ports
    pub fn started(backend: Arc<MockBackend>, settings: RouterSettings) -> Self {
        let mut harness = Self::new(backend, settings);
        harness.router.start();
        harness.pump_until(|router| router.controller().destination().is_some());
        harness
    }

    /// Handle completions from worker threads until `done` holds
    pub fn pump_until(&mut self, mut done: impl FnMut(&Router) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(&self.router) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self
                .router_rx
                .recv_timeout(remaining)
                .expect("router made no progress");
            self.router.handle(event);
        }
    }

    /// Wait until no port operation is outstanding
    pub fn settle(&mut self) {
        self.pump_until(|router| router.controller().in_flight().is_none());
    }

    pub fn add_stream(&mut self, id: u32, serial: u64) {
        self.router.handle(RouterEvent::StreamAdded(StreamInfo {
            id: StreamId(id),
            serial,
            name: format!("app-{}", id),
            description: "Playback".to_string(),
            media_class: APPLICATION_OUTPUT_CLASS.to_string(),
            media_role: None,
        }));
    }

    pub fn ui_events(&self) -> Vec<AudioEvent> {
        self.ui_rx.try_iter().collect()
    }
}

pub fn fast_settings() -> RouterSettings {
    RouterSettings {
        retries: 3,
        retry_delay: Duration::from_millis(5),
        ..RouterSettings::default()
    }
}
