use tracing::info;

use super::backend::{BackendResult, GraphBackend, ModuleId};
use super::graph::{NodeSelector, resolve_channel_ports};
use super::types::{ChannelPorts, PortDirection};

/// The virtual microphone created by virtmic
///
/// A null sink presented as `Audio/Source/Virtual`: whatever is linked into
/// its input ports is what recording applications hear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDevice {
    /// Sink name, as shown by `pactl list sinks`
    pub name: String,
    /// Module that owns the device; unloading it removes the device
    pub module: ModuleId,
}

impl VirtualDevice {
    /// Create the device through the audio server
    pub fn create(backend: &dyn GraphBackend, name: &str, description: &str) -> BackendResult<Self> {
        let module = backend.load_virtual_sink(name, description)?;
        info!("Created virtual microphone {} (module {})", name, module);

        Ok(Self {
            name: name.to_string(),
            module,
        })
    }

    /// Selector finding this device's node in a graph dump
    pub fn selector(&self) -> NodeSelector {
        NodeSelector::ModuleId(self.module.0)
    }

    /// Look up the device's FL/FR input ports in a fresh graph dump
    ///
    /// `Ok(None)` means the node or its ports are not in the graph yet.
    pub fn resolve_inputs(&self, backend: &dyn GraphBackend) -> BackendResult<Option<ChannelPorts>> {
        let snapshot = backend.dump_graph()?;
        Ok(resolve_channel_ports(
            &snapshot,
            self.selector(),
            PortDirection::Input,
        ))
    }

    /// Remove the device
    pub fn destroy(self, backend: &dyn GraphBackend) -> BackendResult<()> {
        backend.unload_virtual_sink(self.module)?;
        info!("Destroyed virtual microphone {} (module {})", self.name, self.module);
        Ok(())
    }
}
