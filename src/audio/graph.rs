//! Point-in-time view of the PipeWire node/port graph
//!
//! A [`PortGraphSnapshot`] is parsed from `pw-dump` output and thrown away after
//! one resolution. Parsing is tolerant: an object with missing or malformed
//! fields is skipped, never fatal to the rest of the dump.

use serde_json::Value;

use super::types::{ChannelPorts, PortDirection, PortId};

const NODE_TYPE: &str = "PipeWire:Interface:Node";
const PORT_TYPE: &str = "PipeWire:Interface:Port";

/// Audio channel carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    FrontLeft,
    FrontRight,
    Other,
}

impl Channel {
    fn from_position(position: &str) -> Self {
        match position {
            "FL" => Channel::FrontLeft,
            "FR" => Channel::FrontRight,
            _ => Channel::Other,
        }
    }
}

/// A node entry of the graph dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeObject {
    /// Graph-local id, referenced by the node's ports
    pub id: u32,
    pub serial: Option<u64>,
    /// `pulse.module.id`, set on devices created through pipewire-pulse modules
    pub module_id: Option<u32>,
}

/// A port entry of the graph dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortObject {
    pub id: PortId,
    pub node_id: u32,
    pub direction: PortDirection,
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphObject {
    Node(NodeObject),
    Port(PortObject),
}

/// Which node a resolution is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelector {
    /// Node whose `object.serial` equals the value (application streams)
    Serial(u64),
    /// Node whose `pulse.module.id` equals the value (the virtual microphone)
    ModuleId(u32),
}

impl NodeSelector {
    fn matches(&self, node: &NodeObject) -> bool {
        match *self {
            NodeSelector::Serial(serial) => node.serial == Some(serial),
            NodeSelector::ModuleId(module_id) => node.module_id == Some(module_id),
        }
    }
}

/// Ordered, immutable list of the nodes and ports in one graph dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortGraphSnapshot {
    objects: Vec<GraphObject>,
}

impl PortGraphSnapshot {
    /// Parse the JSON array printed by `pw-dump`
    ///
    /// Only a document that is not JSON at all is an error. Entries that are not
    /// nodes or ports, or that lack the fields needed here, are dropped.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        let objects = value
            .as_array()
            .map(|entries| entries.iter().filter_map(parse_object).collect())
            .unwrap_or_default();
        Self { objects }
    }

    pub fn objects(&self) -> &[GraphObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn parse_object(entry: &Value) -> Option<GraphObject> {
    let id = lenient_u64(entry.get("id")?).and_then(|id| u32::try_from(id).ok())?;
    let info = entry.get("info")?;
    let props = info.get("props");

    match entry.get("type")?.as_str()? {
        NODE_TYPE => {
            let props = props?;
            Some(GraphObject::Node(NodeObject {
                id,
                serial: props.get("object.serial").and_then(lenient_u64),
                module_id: props
                    .get("pulse.module.id")
                    .and_then(lenient_u64)
                    .and_then(|m| u32::try_from(m).ok()),
            }))
        }
        PORT_TYPE => {
            let props = props?;
            let node_id = props
                .get("node.id")
                .and_then(lenient_u64)
                .and_then(|n| u32::try_from(n).ok())?;
            let direction = parse_direction(info, props)?;
            let channel = props
                .get("audio.channel")
                .and_then(Value::as_str)
                .map(Channel::from_position)
                .unwrap_or(Channel::Other);

            Some(GraphObject::Port(PortObject {
                id: PortId::new(id),
                node_id,
                direction,
                channel,
            }))
        }
        _ => None,
    }
}

fn parse_direction(info: &Value, props: &Value) -> Option<PortDirection> {
    match info.get("direction").and_then(Value::as_str) {
        Some("input") => return Some(PortDirection::Input),
        Some("output") => return Some(PortDirection::Output),
        _ => {}
    }
    match props.get("port.direction").and_then(Value::as_str)? {
        "in" => Some(PortDirection::Input),
        "out" => Some(PortDirection::Output),
        _ => None,
    }
}

/// PipeWire prints numeric props either as numbers or as strings
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Find the FL/FR ports of the node picked by `selector`
///
/// Single forward pass: the dump lists a node before its ports, so the node is
/// located first and its ports are collected from the entries that follow.
/// Returns `None` when the node is absent or does not expose both channels in
/// `direction`.
pub fn resolve_channel_ports(
    snapshot: &PortGraphSnapshot,
    selector: NodeSelector,
    direction: PortDirection,
) -> Option<ChannelPorts> {
    let mut node_id = None;
    let mut fl = None;
    let mut fr = None;

    for object in snapshot.objects() {
        match (object, node_id) {
            (GraphObject::Node(node), None) if selector.matches(node) => {
                node_id = Some(node.id);
            }
            (GraphObject::Port(port), Some(target))
                if port.node_id == target && port.direction == direction =>
            {
                match port.channel {
                    Channel::FrontLeft if fl.is_none() => fl = Some(port.id),
                    Channel::FrontRight if fr.is_none() => fr = Some(port.id),
                    _ => {}
                }
                if let (Some(fl), Some(fr)) = (fl, fr) {
                    return Some(ChannelPorts::new(fl, fr));
                }
            }
            _ => {}
        }
    }

    None
}
