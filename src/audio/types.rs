use std::fmt;

/// PipeWire global id of a stream node
///
/// Stable while the stream lives; the server may hand the same id to a later
/// stream once this one is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stream({})", self.0)
    }
}

/// PipeWire global id of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

impl PortId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

/// Direction of audio flow for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// Input port (receives audio data)
    Input,
    /// Output port (sends audio data)
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "Input"),
            PortDirection::Output => write!(f, "Output"),
        }
    }
}

/// Front-left/front-right port pair of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelPorts {
    pub fl: PortId,
    pub fr: PortId,
}

impl ChannelPorts {
    pub fn new(fl: PortId, fr: PortId) -> Self {
        Self { fl, fr }
    }
}

impl fmt::Display for ChannelPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FL={} FR={}", self.fl.0, self.fr.0)
    }
}

/// Metadata of a node announced by the PipeWire registry
///
/// Carries everything the stream registry needs to decide whether the node
/// is a routable application stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: StreamId,
    /// `object.serial`, never reused by the server
    pub serial: u64,
    /// `application.name`, falling back to `node.name`
    pub name: String,
    /// `media.name` or `node.description`
    pub description: String,
    /// `media.class`, e.g. `Stream/Output/Audio`
    pub media_class: String,
    /// `media.role`, when the client set one
    pub media_role: Option<String>,
}

/// One row of the source menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub label: String,
    /// This stream is the current route target
    pub selected: bool,
    /// Output ports are known, so the stream can be routed
    pub resolvable: bool,
}

/// Observable state of the single route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Idle,
    Connecting,
    Active,
    Disconnecting,
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteState::Idle => write!(f, "Idle"),
            RouteState::Connecting => write!(f, "Connecting"),
            RouteState::Active => write!(f, "Active"),
            RouteState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Commands sent from UI thread to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCommand {
    /// Route this stream into the virtual microphone
    Select { stream_id: StreamId },
    /// Re-publish the stream list
    Refresh,
}

/// Events sent from the router to the UI thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// The virtual microphone exists and its input ports are known
    VirtualMicReady { name: String },
    /// The set of streams or their routability changed
    StreamsChanged { streams: Vec<StreamEntry> },
    /// The route moved to a new state
    RouteChanged {
        state: RouteState,
        stream_id: Option<StreamId>,
    },
    /// Informational message for the status bar
    Status { message: String },
    /// An error occurred
    Error { message: String },
}
