use std::collections::BTreeMap;

use tracing::{debug, info};

use super::types::{ChannelPorts, StreamEntry, StreamId, StreamInfo};

/// `media.class` of application playback streams
pub const APPLICATION_OUTPUT_CLASS: &str = "Stream/Output/Audio";

/// Progress of a stream's port lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A lookup is outstanding; `attempt` counts from 1
    Pending { attempt: u32 },
    Resolved,
    /// Every attempt came back without a stereo output pair
    Unroutable,
}

/// One routable audio stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: StreamId,
    pub serial: u64,
    pub name: String,
    pub description: String,
    pub output_ports: Option<ChannelPorts>,
    pub resolution: Resolution,
}

impl Stream {
    /// Text shown in the source menu
    pub fn label(&self) -> String {
        if self.description.is_empty() || self.description == self.name {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.description)
        }
    }
}

/// Port lookup the registry wants performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveRequest {
    pub id: StreamId,
    pub serial: u64,
    pub attempt: u32,
}

/// What to do after a lookup came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Ports stored on the stream
    Resolved(ChannelPorts),
    /// Nothing found yet; look again
    Retry(ResolveRequest),
    /// Out of attempts, stream stays listed but cannot be routed
    Unroutable,
    /// The stream is gone (or its id now belongs to another stream)
    Dropped,
}

/// Live set of application output streams, keyed by PipeWire id
pub struct StreamRegistry {
    streams: BTreeMap<StreamId, Stream>,
    /// Lookups allowed after the first one
    retries: u32,
    /// Application names never offered for routing
    ignored_names: Vec<String>,
}

impl StreamRegistry {
    pub fn new(retries: u32, ignored_names: Vec<String>) -> Self {
        Self {
            streams: BTreeMap::new(),
            retries,
            ignored_names,
        }
    }

    /// Handle a node announced by the audio server
    ///
    /// Returns the port lookup to start when the node was accepted as a new
    /// routable stream.
    pub fn on_stream_added(&mut self, info: StreamInfo) -> Option<ResolveRequest> {
        if info.media_class != APPLICATION_OUTPUT_CLASS {
            return None;
        }

        if self.is_event_stream(&info) {
            debug!("Ignoring event stream {} ({})", info.id, info.name);
            return None;
        }

        if let Some(existing) = self.streams.get(&info.id) {
            if existing.serial == info.serial {
                return None;
            }
            // Missed the removal of the previous owner of this id
            debug!("{} reused by serial {}", info.id, info.serial);
        }

        info!("Stream added: {} {} (serial {})", info.id, info.name, info.serial);

        let request = ResolveRequest {
            id: info.id,
            serial: info.serial,
            attempt: 1,
        };
        self.streams.insert(
            info.id,
            Stream {
                id: info.id,
                serial: info.serial,
                name: info.name,
                description: info.description,
                output_ports: None,
                resolution: Resolution::Pending { attempt: 1 },
            },
        );

        Some(request)
    }

    /// Store the result of a port lookup
    ///
    /// Results for streams that were removed, or whose id now names a different
    /// stream, are dropped.
    pub fn on_ports_resolved(
        &mut self,
        request: ResolveRequest,
        ports: Option<ChannelPorts>,
    ) -> ResolveOutcome {
        let retries = self.retries;
        let Some(stream) = self
            .streams
            .get_mut(&request.id)
            .filter(|s| s.serial == request.serial)
        else {
            debug!("Dropping late port lookup for {}", request.id);
            return ResolveOutcome::Dropped;
        };

        if stream.resolution != (Resolution::Pending { attempt: request.attempt }) {
            return ResolveOutcome::Dropped;
        }

        match ports {
            Some(ports) => {
                debug!("{} output ports {}", stream.id, ports);
                stream.output_ports = Some(ports);
                stream.resolution = Resolution::Resolved;
                ResolveOutcome::Resolved(ports)
            }
            None if request.attempt <= retries => {
                let attempt = request.attempt.saturating_add(1);
                stream.resolution = Resolution::Pending { attempt };
                ResolveOutcome::Retry(ResolveRequest { attempt, ..request })
            }
            None => {
                info!("{} ({}) has no stereo output, not routable", stream.id, stream.name);
                stream.resolution = Resolution::Unroutable;
                ResolveOutcome::Unroutable
            }
        }
    }

    /// Drop the entry under `info.id` when it belongs to an older stream
    ///
    /// PipeWire reuses ids, so a new serial under a tracked id means the
    /// removal of the previous owner was missed.
    pub fn evict_previous_owner(&mut self, info: &StreamInfo) -> Option<Stream> {
        if self.streams.get(&info.id)?.serial == info.serial {
            return None;
        }
        debug!("{} reused by serial {}", info.id, info.serial);
        self.on_stream_removed(info.id)
    }

    /// Forget a stream; unknown ids are ignored
    pub fn on_stream_removed(&mut self, id: StreamId) -> Option<Stream> {
        let removed = self.streams.remove(&id);
        if let Some(stream) = &removed {
            info!("Stream removed: {} {}", stream.id, stream.name);
        }
        removed
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    /// Resolved output ports of a tracked stream
    pub fn output_ports(&self, id: StreamId) -> Option<ChannelPorts> {
        self.streams.get(&id).and_then(|s| s.output_ports)
    }

    /// Tracked streams ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Menu rows, marking `selected` as the current route target
    pub fn entries(&self, selected: Option<StreamId>) -> Vec<StreamEntry> {
        self.iter()
            .map(|stream| StreamEntry {
                id: stream.id,
                label: stream.label(),
                selected: Some(stream.id) == selected,
                resolvable: stream.output_ports.is_some(),
            })
            .collect()
    }

    fn is_event_stream(&self, info: &StreamInfo) -> bool {
        let event_role = info
            .media_role
            .as_deref()
            .map(|role| role.eq_ignore_ascii_case("event") || role.eq_ignore_ascii_case("notification"))
            .unwrap_or(false);

        event_role || self.ignored_names.iter().any(|name| name == &info.name)
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(0, Vec::new())
    }
}
