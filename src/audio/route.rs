//! The single route from one stream into the virtual microphone
//!
//! [`RouteController`] is a synchronous state machine. It never runs external
//! commands itself: every transition that needs the graph changed hands back a
//! [`PortOp`], and the caller reports the result through
//! [`RouteController::on_op_complete`]. At most one `PortOp` is outstanding at
//! any time, which is what keeps two sources from ever feeding the
//! destination together.

use tracing::{debug, info, warn};

use super::registry::StreamRegistry;
use super::types::{ChannelPorts, PortId, RouteState, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Link,
    Unlink,
}

/// One output→input port connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortLink {
    pub output: PortId,
    pub input: PortId,
}

impl PortLink {
    pub fn new(output: PortId, input: PortId) -> Self {
        Self { output, input }
    }
}

/// Channel-wise links between a stream and the destination
fn channel_links(source: ChannelPorts, destination: ChannelPorts) -> Vec<PortLink> {
    vec![
        PortLink::new(source.fl, destination.fl),
        PortLink::new(source.fr, destination.fr),
    ]
}

/// Graph edit requested by the controller; links are applied in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOp {
    pub action: LinkAction,
    pub stream_id: StreamId,
    pub links: Vec<PortLink>,
}

/// Result of a [`PortOp`]: the links whose command succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpOutcome {
    pub succeeded: Vec<PortLink>,
}

impl OpOutcome {
    pub fn all(op: &PortOp) -> Self {
        Self {
            succeeded: op.links.clone(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Stream currently linked (or being linked/unlinked), with its own copy of
/// the ports so teardown works after the registry forgot the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveRoute {
    stream_id: StreamId,
    ports: ChannelPorts,
}

pub struct RouteController {
    destination: Option<ChannelPorts>,
    state: RouteState,
    active: Option<ActiveRoute>,
    in_flight: Option<PortOp>,
    /// Latest selection waiting for the in-flight op (or the destination)
    queued: Option<StreamId>,
    /// The connecting stream disappeared before its links completed
    target_removed: bool,
    shutting_down: bool,
}

impl RouteController {
    pub fn new() -> Self {
        Self {
            destination: None,
            state: RouteState::Idle,
            active: None,
            in_flight: None,
            queued: None,
            target_removed: false,
            shutting_down: false,
        }
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    /// Stream owning the route in any non-idle state
    pub fn active_stream(&self) -> Option<StreamId> {
        self.active.map(|route| route.stream_id)
    }

    /// Stream whose links are confirmed
    pub fn selected(&self) -> Option<StreamId> {
        match self.state {
            RouteState::Active => self.active_stream(),
            _ => None,
        }
    }

    pub fn destination(&self) -> Option<ChannelPorts> {
        self.destination
    }

    pub fn in_flight(&self) -> Option<&PortOp> {
        self.in_flight.as_ref()
    }

    /// Shutdown was requested and the last link is gone
    pub fn is_settled(&self) -> bool {
        self.shutting_down && self.in_flight.is_none() && self.state == RouteState::Idle
    }

    /// The virtual microphone's input ports became known
    pub fn set_destination(
        &mut self,
        destination: ChannelPorts,
        registry: &StreamRegistry,
    ) -> Option<PortOp> {
        info!("Destination ports {}", destination);
        self.destination = Some(destination);

        if self.in_flight.is_none() && self.state == RouteState::Idle {
            return self.start_queued(registry);
        }
        None
    }

    /// Route `stream_id` into the virtual microphone
    pub fn select(&mut self, stream_id: StreamId, registry: &StreamRegistry) -> Option<PortOp> {
        if self.shutting_down {
            debug!("Ignoring selection of {} during shutdown", stream_id);
            return None;
        }

        if self.in_flight.is_some() || self.destination.is_none() {
            debug!("Queueing selection of {} behind {}", stream_id, self.state);
            self.queued = Some(stream_id);
            return None;
        }

        if self.active_stream() == Some(stream_id) {
            return None;
        }

        let Some(ports) = registry.output_ports(stream_id) else {
            debug!("{} has no resolved output ports, not selectable", stream_id);
            return None;
        };

        match self.state {
            RouteState::Idle => self.begin_connect(stream_id, ports),
            RouteState::Active => {
                info!(
                    "Switching route from {:?} to {}",
                    self.active_stream(),
                    stream_id
                );
                self.queued = Some(stream_id);
                self.begin_disconnect()
            }
            // Transitional states always have an op in flight
            RouteState::Connecting | RouteState::Disconnecting => None,
        }
    }

    /// A stream left the registry
    pub fn on_stream_removed(&mut self, stream_id: StreamId) -> Option<PortOp> {
        if self.queued == Some(stream_id) {
            self.queued = None;
        }

        if self.active_stream() != Some(stream_id) {
            return None;
        }

        match self.state {
            RouteState::Active => {
                info!("Active stream {} removed, disconnecting", stream_id);
                self.begin_disconnect()
            }
            RouteState::Connecting => {
                self.target_removed = true;
                None
            }
            RouteState::Disconnecting | RouteState::Idle => None,
        }
    }

    /// Feed back the result of the op returned earlier
    pub fn on_op_complete(
        &mut self,
        outcome: OpOutcome,
        registry: &StreamRegistry,
    ) -> Option<PortOp> {
        let Some(op) = self.in_flight.take() else {
            warn!("Port operation completed with none outstanding");
            return None;
        };

        let failed = op
            .links
            .iter()
            .filter(|link| !outcome.succeeded.contains(link))
            .count();

        match op.action {
            LinkAction::Link if failed == 0 => {
                self.state = RouteState::Active;
                if self.target_removed || self.shutting_down {
                    return self.begin_disconnect();
                }
                info!("Route active: {}", op.stream_id);
                self.start_queued(registry)
            }
            LinkAction::Link => {
                warn!(
                    "Connecting {} failed for {} of {} links",
                    op.stream_id,
                    failed,
                    op.links.len()
                );
                if outcome.succeeded.is_empty() {
                    self.finish_idle();
                    return self.start_queued(registry);
                }
                // Take back the half that did link
                self.state = RouteState::Disconnecting;
                self.submit(PortOp {
                    action: LinkAction::Unlink,
                    stream_id: op.stream_id,
                    links: outcome.succeeded,
                })
            }
            LinkAction::Unlink => {
                if failed > 0 {
                    warn!(
                        "Disconnecting {} failed for {} of {} links, continuing",
                        op.stream_id,
                        failed,
                        op.links.len()
                    );
                }
                self.finish_idle();
                self.start_queued(registry)
            }
        }
    }

    /// Stop accepting selections and tear down whatever is linked
    pub fn shutdown(&mut self) -> Option<PortOp> {
        self.shutting_down = true;
        self.queued = None;

        match (self.state, &self.in_flight) {
            (RouteState::Active, None) => self.begin_disconnect(),
            _ => None,
        }
    }

    fn begin_connect(&mut self, stream_id: StreamId, ports: ChannelPorts) -> Option<PortOp> {
        let destination = self.destination?;
        self.state = RouteState::Connecting;
        self.active = Some(ActiveRoute { stream_id, ports });
        self.target_removed = false;

        self.submit(PortOp {
            action: LinkAction::Link,
            stream_id,
            links: channel_links(ports, destination),
        })
    }

    fn begin_disconnect(&mut self) -> Option<PortOp> {
        let route = self.active?;
        let destination = self.destination?;
        self.state = RouteState::Disconnecting;

        self.submit(PortOp {
            action: LinkAction::Unlink,
            stream_id: route.stream_id,
            links: channel_links(route.ports, destination),
        })
    }

    fn submit(&mut self, op: PortOp) -> Option<PortOp> {
        self.in_flight = Some(op.clone());
        Some(op)
    }

    fn finish_idle(&mut self) {
        self.state = RouteState::Idle;
        self.active = None;
        self.target_removed = false;
    }

    fn start_queued(&mut self, registry: &StreamRegistry) -> Option<PortOp> {
        if self.shutting_down {
            return None;
        }
        let next = self.queued.take()?;
        self.select(next, registry)
    }
}

impl Default for RouteController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::registry::{APPLICATION_OUTPUT_CLASS, ResolveOutcome};
    use crate::audio::types::StreamInfo;
    use std::collections::HashSet;

    const A: StreamId = StreamId(100);
    const B: StreamId = StreamId(200);
    const C: StreamId = StreamId(300);

    fn ports(fl: u32, fr: u32) -> ChannelPorts {
        ChannelPorts::new(PortId(fl), PortId(fr))
    }

    fn link(output: u32, input: u32) -> PortLink {
        PortLink::new(PortId(output), PortId(input))
    }

    /// Controller plus a fake graph that applies ops immediately
    struct Harness {
        controller: RouteController,
        registry: StreamRegistry,
        graph: HashSet<PortLink>,
        log: Vec<(LinkAction, PortLink)>,
    }

    impl Harness {
        fn new() -> Self {
            let mut harness = Self {
                controller: RouteController::new(),
                registry: StreamRegistry::default(),
                graph: HashSet::new(),
                log: Vec::new(),
            };
            harness.add_stream(A, Some(ports(10, 11)));
            harness.add_stream(B, Some(ports(20, 21)));
            harness.add_stream(C, None);
            let op = harness
                .controller
                .set_destination(ports(1, 2), &harness.registry);
            assert!(op.is_none());
            harness
        }

        fn add_stream(&mut self, id: StreamId, resolved: Option<ChannelPorts>) {
            let request = self
                .registry
                .on_stream_added(StreamInfo {
                    id,
                    serial: u64::from(id.0) * 10,
                    name: format!("app-{}", id.0),
                    description: String::new(),
                    media_class: APPLICATION_OUTPUT_CLASS.to_string(),
                    media_role: None,
                })
                .unwrap();
            if let Some(resolved) = resolved {
                assert_eq!(
                    self.registry.on_ports_resolved(request, Some(resolved)),
                    ResolveOutcome::Resolved(resolved)
                );
            }
        }

        /// Apply an op and every follow-up, all succeeding
        fn drive(&mut self, mut op: Option<PortOp>) {
            while let Some(current) = op.take() {
                let outcome = self.apply(&current, |_| true);
                op = self.controller.on_op_complete(outcome, &self.registry);
                self.assert_single_source();
            }
        }

        fn apply(&mut self, op: &PortOp, succeed: impl Fn(&PortLink) -> bool) -> OpOutcome {
            let mut outcome = OpOutcome::none();
            for link in &op.links {
                self.log.push((op.action, *link));
                if succeed(link) {
                    match op.action {
                        LinkAction::Link => self.graph.insert(*link),
                        LinkAction::Unlink => self.graph.remove(link),
                    };
                    outcome.succeeded.push(*link);
                }
            }
            outcome
        }

        fn select(&mut self, id: StreamId) {
            let op = self.controller.select(id, &self.registry);
            self.drive(op);
        }

        fn remove(&mut self, id: StreamId) {
            self.registry.on_stream_removed(id);
            let op = self.controller.on_stream_removed(id);
            self.drive(op);
        }

        fn assert_single_source(&self) {
            let sources: HashSet<_> = self
                .graph
                .iter()
                .map(|l| match l.output.0 {
                    10 | 11 => A,
                    20 | 21 => B,
                    _ => C,
                })
                .collect();
            assert!(sources.len() <= 1, "two sources linked: {:?}", self.graph);
        }
    }

    #[test]
    fn select_links_both_channels() {
        let mut h = Harness::new();
        h.select(A);

        assert_eq!(
            h.log,
            vec![(LinkAction::Link, link(10, 1)), (LinkAction::Link, link(11, 2))]
        );
        assert_eq!(h.controller.state(), RouteState::Active);
        assert_eq!(h.controller.selected(), Some(A));
    }

    #[test]
    fn reselecting_active_stream_is_idempotent() {
        let mut h = Harness::new();
        h.select(A);
        h.log.clear();

        assert!(h.controller.select(A, &h.registry).is_none());
        assert!(h.log.is_empty());
        assert_eq!(h.controller.state(), RouteState::Active);
        assert_eq!(h.controller.active_stream(), Some(A));
    }

    #[test]
    fn switch_unlinks_old_before_linking_new() {
        let mut h = Harness::new();
        h.select(A);
        h.log.clear();
        h.select(B);

        assert_eq!(
            h.log,
            vec![
                (LinkAction::Unlink, link(10, 1)),
                (LinkAction::Unlink, link(11, 2)),
                (LinkAction::Link, link(20, 1)),
                (LinkAction::Link, link(21, 2)),
            ]
        );
        assert_eq!(h.controller.selected(), Some(B));
    }

    #[test]
    fn scenario_select_switch_remove() {
        let mut h = Harness::new();
        h.select(A);
        h.select(B);
        h.remove(B);

        assert_eq!(
            h.log,
            vec![
                (LinkAction::Link, link(10, 1)),
                (LinkAction::Link, link(11, 2)),
                (LinkAction::Unlink, link(10, 1)),
                (LinkAction::Unlink, link(11, 2)),
                (LinkAction::Link, link(20, 1)),
                (LinkAction::Link, link(21, 2)),
                (LinkAction::Unlink, link(20, 1)),
                (LinkAction::Unlink, link(21, 2)),
            ]
        );
        assert_eq!(h.controller.state(), RouteState::Idle);
        assert_eq!(h.controller.active_stream(), None);
        assert!(h.graph.is_empty());
    }

    #[test]
    fn removing_active_stream_uses_retained_ports() {
        let mut h = Harness::new();
        h.select(A);
        h.log.clear();
        h.remove(A);

        assert_eq!(
            h.log,
            vec![(LinkAction::Unlink, link(10, 1)), (LinkAction::Unlink, link(11, 2))]
        );
        assert_eq!(h.controller.state(), RouteState::Idle);

        // Nothing may reference A afterwards
        h.log.clear();
        h.select(A);
        assert!(h.log.is_empty());
    }

    #[test]
    fn removing_inactive_stream_does_nothing() {
        let mut h = Harness::new();
        h.select(A);
        h.log.clear();
        h.remove(B);

        assert!(h.log.is_empty());
        assert_eq!(h.controller.selected(), Some(A));
    }

    #[test]
    fn unresolved_stream_is_not_selectable() {
        let mut h = Harness::new();
        assert!(h.controller.select(C, &h.registry).is_none());
        assert_eq!(h.controller.state(), RouteState::Idle);

        h.select(A);
        h.log.clear();
        assert!(h.controller.select(C, &h.registry).is_none());
        assert!(h.log.is_empty());
        assert_eq!(h.controller.selected(), Some(A));
    }

    #[test]
    fn selections_before_destination_are_queued() {
        let mut registry = StreamRegistry::default();
        let request = registry
            .on_stream_added(StreamInfo {
                id: A,
                serial: 1,
                name: "a".to_string(),
                description: String::new(),
                media_class: APPLICATION_OUTPUT_CLASS.to_string(),
                media_role: None,
            })
            .unwrap();
        registry.on_ports_resolved(request, Some(ports(10, 11)));

        let mut controller = RouteController::new();
        assert!(controller.select(A, &registry).is_none());

        let op = controller.set_destination(ports(1, 2), &registry).unwrap();
        assert_eq!(op.action, LinkAction::Link);
        assert_eq!(op.links, vec![link(10, 1), link(11, 2)]);
    }

    #[test]
    fn selects_during_transition_coalesce_to_latest() {
        let mut h = Harness::new();
        let connect_a = h.controller.select(A, &h.registry).unwrap();

        // Both arrive while A is still connecting; only B should survive
        assert!(h.controller.select(A, &h.registry).is_none());
        assert!(h.controller.select(B, &h.registry).is_none());
        assert_eq!(h.controller.state(), RouteState::Connecting);

        h.drive(Some(connect_a));
        assert_eq!(h.controller.selected(), Some(B));
        assert_eq!(
            h.log.iter().filter(|(a, _)| *a == LinkAction::Link).count(),
            4
        );
    }

    #[test]
    fn failed_connect_returns_to_idle() {
        let mut h = Harness::new();
        let op = h.controller.select(A, &h.registry).unwrap();
        let outcome = h.apply(&op, |_| false);

        assert!(h.controller.on_op_complete(outcome, &h.registry).is_none());
        assert_eq!(h.controller.state(), RouteState::Idle);
        assert_eq!(h.controller.active_stream(), None);
    }

    #[test]
    fn half_connect_is_rolled_back() {
        let mut h = Harness::new();
        let op = h.controller.select(A, &h.registry).unwrap();
        let outcome = h.apply(&op, |l| l.output == PortId(10));

        let rollback = h.controller.on_op_complete(outcome, &h.registry).unwrap();
        assert_eq!(rollback.action, LinkAction::Unlink);
        assert_eq!(rollback.links, vec![link(10, 1)]);

        h.drive(Some(rollback));
        assert_eq!(h.controller.state(), RouteState::Idle);
        assert!(h.graph.is_empty());
    }

    #[test]
    fn failed_unlink_does_not_block_switch() {
        let mut h = Harness::new();
        h.select(A);

        let unlink = h.controller.select(B, &h.registry).unwrap();
        let outcome = h.apply(&unlink, |_| false);
        let connect = h.controller.on_op_complete(outcome, &h.registry).unwrap();

        assert_eq!(connect.action, LinkAction::Link);
        assert_eq!(connect.stream_id, B);
    }

    #[test]
    fn stream_removed_while_connecting_is_torn_down() {
        let mut h = Harness::new();
        let connect = h.controller.select(A, &h.registry).unwrap();
        h.registry.on_stream_removed(A);
        assert!(h.controller.on_stream_removed(A).is_none());

        let outcome = h.apply(&connect, |_| true);
        let teardown = h.controller.on_op_complete(outcome, &h.registry).unwrap();
        assert_eq!(teardown.action, LinkAction::Unlink);

        h.drive(Some(teardown));
        assert_eq!(h.controller.state(), RouteState::Idle);
        assert!(h.graph.is_empty());
    }

    #[test]
    fn queued_target_removed_is_dropped() {
        let mut h = Harness::new();
        let connect = h.controller.select(A, &h.registry).unwrap();
        h.controller.select(B, &h.registry);
        h.registry.on_stream_removed(B);
        h.controller.on_stream_removed(B);

        h.drive(Some(connect));
        assert_eq!(h.controller.selected(), Some(A));
    }

    #[test]
    fn shutdown_tears_down_and_rejects_selection() {
        let mut h = Harness::new();
        h.select(A);
        assert!(!h.controller.is_settled());

        let op = h.controller.shutdown();
        h.drive(op);
        assert!(h.controller.is_settled());
        assert!(h.graph.is_empty());

        assert!(h.controller.select(B, &h.registry).is_none());
        assert_eq!(h.controller.state(), RouteState::Idle);
    }

    #[test]
    fn shutdown_while_connecting_unlinks_after_completion() {
        let mut h = Harness::new();
        let connect = h.controller.select(A, &h.registry).unwrap();
        assert!(h.controller.shutdown().is_none());

        h.drive(Some(connect));
        assert!(h.controller.is_settled());
        assert!(h.graph.is_empty());
    }
}
