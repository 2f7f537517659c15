//! Vantage points: the per-node containers of flows, paths, and ping pairs.

use std::collections::BTreeMap;

use crate::errors::SimDataError;
use crate::events::Event;
use crate::filter::TraceFilter;
use crate::flow::{HostFlow, ObserverFlow};
use crate::path::PathMeasurements;
use crate::ping::{PingPair, PingPairKind};
use crate::types::{FlowId, NodeId, PathId};

/// Kind of a recording vantage point, as declared in the trace document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VantagePointKind {
    Client,
    Server,
    Network,
}

impl VantagePointKind {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Self::Client),
            "server" => Some(Self::Server),
            "network" => Some(Self::Network),
            _ => None,
        }
    }
}

/// A client or server host vantage point.
#[derive(Debug, Clone)]
pub struct HostVantagePoint {
    node_id: NodeId,
    flows: BTreeMap<FlowId, HostFlow>,
}

impl HostVantagePoint {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            flows: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn add_event(&mut self, event: Event) {
        self.flows
            .entry(event.flow_id)
            .or_insert_with(|| HostFlow::new(event.flow_id))
            .add_event(event);
    }

    pub fn flow(&self, flow_id: FlowId) -> Option<&HostFlow> {
        self.flows.get(&flow_id)
    }

    pub fn flows(&self) -> impl Iterator<Item = &HostFlow> {
        self.flows.values()
    }

    pub fn flow_ids(&self) -> impl Iterator<Item = FlowId> + '_ {
        self.flows.keys().copied()
    }

    pub fn event_count(&self) -> usize {
        self.flows.values().map(|f| f.events().count()).sum()
    }

    pub(crate) fn sort_events(&mut self) {
        for flow in self.flows.values_mut() {
            flow.sort_events();
        }
    }

    /// Host events are outside the scope of the trace filters; the clone is
    /// still deep so downstream mutation stays isolated.
    pub fn apply_filter(&self, _filter: &TraceFilter) -> Self {
        self.clone()
    }
}

/// An in-network observer vantage point.
#[derive(Debug, Clone)]
pub struct ObserverVantagePoint {
    node_id: NodeId,
    flows: BTreeMap<FlowId, ObserverFlow>,
    paths: BTreeMap<PathId, PathMeasurements>,
    ping_clients: BTreeMap<NodeId, PingPair>,
    ping_servers: BTreeMap<NodeId, PingPair>,
}

impl ObserverVantagePoint {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            flows: BTreeMap::new(),
            paths: BTreeMap::new(),
            ping_clients: BTreeMap::new(),
            ping_servers: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Routes an event to the flow, path, or ping-pair container its kind
    /// belongs to. Path and ping series are keyed by the event's group id.
    pub fn add_event(&mut self, event: Event) -> Result<(), SimDataError> {
        if event.is_path_event() {
            let path_id = PathId::new(event.flow_id.inner());
            self.paths
                .entry(path_id)
                .or_insert_with(|| PathMeasurements::new(path_id))
                .add_event(event)?;
        } else if event.is_ping_client_event() {
            let target = NodeId::new(event.flow_id.inner());
            self.ping_clients
                .entry(target)
                .or_insert_with(|| PingPair::new(PingPairKind::Client, target))
                .add_event(event)?;
        } else if event.is_ping_server_event() {
            let target = NodeId::new(event.flow_id.inner());
            self.ping_servers
                .entry(target)
                .or_insert_with(|| PingPair::new(PingPairKind::Server, target))
                .add_event(event)?;
        } else {
            self.flows
                .entry(event.flow_id)
                .or_insert_with(|| ObserverFlow::new(event.flow_id))
                .add_event(event);
        }
        Ok(())
    }

    pub fn flow(&self, flow_id: FlowId) -> Option<&ObserverFlow> {
        self.flows.get(&flow_id)
    }

    pub fn flow_or_err(&self, flow_id: FlowId) -> Result<&ObserverFlow, SimDataError> {
        self.flows
            .get(&flow_id)
            .ok_or(SimDataError::FlowNotAtObserver {
                observer: self.node_id,
                flow: flow_id,
            })
    }

    pub fn flow_ids(&self) -> impl Iterator<Item = FlowId> + '_ {
        self.flows.keys().copied()
    }

    pub fn path(&self, path_id: PathId) -> Option<&PathMeasurements> {
        self.paths.get(&path_id)
    }

    pub fn path_ids(&self) -> impl Iterator<Item = PathId> + '_ {
        self.paths.keys().copied()
    }

    pub fn client_ping_pairs(&self) -> impl Iterator<Item = (NodeId, &PingPair)> {
        self.ping_clients.iter().map(|(&target, pp)| (target, pp))
    }

    pub fn server_ping_pairs(&self) -> impl Iterator<Item = (NodeId, &PingPair)> {
        self.ping_servers.iter().map(|(&target, pp)| (target, pp))
    }

    pub fn event_count(&self) -> usize {
        let flows: usize = self.flows.values().map(|f| f.events().count()).sum();
        let paths: usize = self.paths.values().map(|p| p.event_count()).sum();
        flows + paths
    }

    pub(crate) fn sort_events(&mut self) {
        for flow in self.flows.values_mut() {
            flow.sort_events();
        }
        for path in self.paths.values_mut() {
            path.sort_events();
        }
        for pp in self.ping_clients.values_mut() {
            pp.sort_events();
        }
        for pp in self.ping_servers.values_mut() {
            pp.sort_events();
        }
    }

    /// Produces a deep copy with the filter applied to every flow.
    pub fn apply_filter(&self, filter: &TraceFilter) -> Self {
        let mut filtered = self.clone();
        filtered.flows = self
            .flows
            .iter()
            .map(|(&fid, flow)| (fid, flow.apply_filter(filter)))
            .collect();
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventData, EventKind};

    #[test]
    fn events_are_routed_by_kind() {
        let mut vp = ObserverVantagePoint::new(NodeId::new(3));
        vp.add_event(Event::new(
            EventKind::QLoss,
            0.1,
            FlowId::new(1),
            EventData::LossMeasurement {
                pkt_count: 64,
                loss: 1,
            },
        ))
        .unwrap();
        vp.add_event(Event::new(
            EventKind::PathLSet,
            0.2,
            FlowId::new(5),
            EventData::BitSetPCount {
                pkt_count: 10,
                seq: 1,
            },
        ))
        .unwrap();
        vp.add_event(Event::new(
            EventKind::PingRtLoss,
            0.3,
            FlowId::new(7),
            EventData::LossMeasurement {
                pkt_count: 10,
                loss: 0,
            },
        ))
        .unwrap();
        vp.add_event(Event::new(
            EventKind::PingEteLoss,
            0.4,
            FlowId::new(8),
            EventData::LossMeasurement {
                pkt_count: 10,
                loss: 0,
            },
        ))
        .unwrap();

        assert!(vp.flow(FlowId::new(1)).is_some());
        assert!(vp.path(PathId::new(5)).is_some());
        assert_eq!(vp.client_ping_pairs().count(), 1);
        assert_eq!(vp.server_ping_pairs().count(), 1);
    }

    #[test]
    fn filter_clones_deeply() {
        let mut vp = ObserverVantagePoint::new(NodeId::new(3));
        for t in [0.1, 0.2, 0.3] {
            vp.add_event(Event::new(
                EventKind::SpinDelay,
                t,
                FlowId::new(1),
                EventData::DelayMeasurement {
                    full_delay_ms: 5,
                    half_delay_ms: None,
                },
            ))
            .unwrap();
        }
        vp.sort_events();

        let filter = TraceFilter {
            l_bit_triggered_monitoring: false,
            remove_last_spin_transients: 2,
        };
        let filtered = vp.apply_filter(&filter);

        let before = vp.flow(FlowId::new(1)).unwrap().events().count();
        let after = filtered.flow(FlowId::new(1)).unwrap().events().count();
        assert_eq!(before, 3);
        assert_eq!(after, 1);
    }
}
