//! The per-run result set: owner of all vantage points and of the run-level
//! tables declared in the trace summary.

use std::collections::{BTreeMap, BTreeSet};

use ordered_float::NotNan;

use crate::errors::SimDataError;
use crate::events::{Event, EventKind};
use crate::filter::TraceFilter;
use crate::types::{
    ConnId, FailedLink, FiveTuple, FlowId, FlowStats, Link, LinkConfig, LinkStats, NodeId, PathId,
    PathInfo, SimId,
};
use crate::vantage::{HostVantagePoint, ObserverVantagePoint, VantagePointKind};

/// All data of a single simulation run. Append-only during import; filters
/// produce deep-cloned copies.
#[derive(Debug, Clone)]
pub struct ResultSet {
    sim_id: SimId,
    config: serde_json::Value,

    clients: BTreeMap<NodeId, HostVantagePoint>,
    servers: BTreeMap<NodeId, HostVantagePoint>,
    observers: BTreeMap<NodeId, ObserverVantagePoint>,

    // Ids declared by the summary; available even when traces are disabled
    // for a vantage-point class.
    client_ids: BTreeSet<NodeId>,
    server_ids: BTreeSet<NodeId>,
    observer_ids: BTreeSet<NodeId>,

    observer_flow_info: BTreeMap<FlowId, FiveTuple>,
    host_conn_info: BTreeMap<ConnId, FiveTuple>,
    observer_path_info: BTreeMap<PathId, PathInfo>,
    observer_flow_stats: BTreeMap<(NodeId, FlowId), FlowStats>,

    failed_links: BTreeMap<Link, FailedLink>,
    backbone_overrides: BTreeMap<Link, LinkConfig>,
    ping_paths: BTreeMap<(NodeId, NodeId), Vec<NodeId>>,
    edge_links: Vec<Link>,
    core_links: Vec<Link>,
    link_gt_stats: BTreeMap<Link, LinkStats>,

    event_counts: BTreeMap<EventKind, u64>,
    filter: Option<TraceFilter>,
}

impl ResultSet {
    pub fn new(sim_id: impl Into<SimId>, config: serde_json::Value) -> Self {
        Self {
            sim_id: sim_id.into(),
            config,
            clients: BTreeMap::new(),
            servers: BTreeMap::new(),
            observers: BTreeMap::new(),
            client_ids: BTreeSet::new(),
            server_ids: BTreeSet::new(),
            observer_ids: BTreeSet::new(),
            observer_flow_info: BTreeMap::new(),
            host_conn_info: BTreeMap::new(),
            observer_path_info: BTreeMap::new(),
            observer_flow_stats: BTreeMap::new(),
            failed_links: BTreeMap::new(),
            backbone_overrides: BTreeMap::new(),
            ping_paths: BTreeMap::new(),
            edge_links: Vec::new(),
            core_links: Vec::new(),
            link_gt_stats: BTreeMap::new(),
            event_counts: BTreeMap::new(),
            filter: None,
        }
    }

    // ----- import-side mutators -----

    pub fn register_client(&mut self, id: NodeId) {
        self.client_ids.insert(id);
    }

    pub fn register_server(&mut self, id: NodeId) {
        self.server_ids.insert(id);
    }

    pub fn register_observer(&mut self, id: NodeId) {
        self.observer_ids.insert(id);
    }

    pub fn set_flow_stats(&mut self, observer: NodeId, flow: FlowId, stats: FlowStats) {
        self.observer_flow_stats.insert((observer, flow), stats);
    }

    pub fn add_failed_link(&mut self, fl: FailedLink) {
        self.failed_links.insert(fl.link(), fl);
    }

    pub fn add_backbone_override(&mut self, lc: LinkConfig) {
        self.backbone_overrides.insert(lc.link(), lc);
    }

    pub fn add_host_connection(&mut self, conn: ConnId, tuple: FiveTuple) {
        self.host_conn_info.insert(conn, tuple);
    }

    pub fn add_observer_flow_info(&mut self, flow: FlowId, tuple: FiveTuple) {
        self.observer_flow_info.insert(flow, tuple);
    }

    pub fn add_observer_path_info(&mut self, path: PathId, info: PathInfo) {
        self.observer_path_info.insert(path, info);
    }

    pub fn add_ping_route(&mut self, src: NodeId, dst: NodeId, route: Vec<NodeId>) {
        self.ping_paths.insert((src, dst), route);
    }

    pub fn add_edge_link(&mut self, link: Link) {
        self.edge_links.push(link);
    }

    pub fn add_core_link(&mut self, link: Link) {
        self.core_links.push(link);
    }

    pub fn set_link_gt_stats(&mut self, link: Link, stats: LinkStats) {
        self.link_gt_stats.insert(link, stats);
    }

    /// Stores one trace event at the named vantage point, creating the
    /// vantage point on first sight.
    pub fn add_trace_event(
        &mut self,
        kind: VantagePointKind,
        node_id: NodeId,
        event: Event,
    ) -> Result<(), SimDataError> {
        *self.event_counts.entry(event.kind).or_default() += 1;
        match kind {
            VantagePointKind::Client => {
                self.clients
                    .entry(node_id)
                    .or_insert_with(|| HostVantagePoint::new(node_id))
                    .add_event(event);
                Ok(())
            }
            VantagePointKind::Server => {
                self.servers
                    .entry(node_id)
                    .or_insert_with(|| HostVantagePoint::new(node_id))
                    .add_event(event);
                Ok(())
            }
            VantagePointKind::Network => self
                .observers
                .entry(node_id)
                .or_insert_with(|| ObserverVantagePoint::new(node_id))
                .add_event(event),
        }
    }

    /// Restores the by-time event ordering; called once per imported
    /// document.
    pub fn finish_import(&mut self) {
        for vp in self.clients.values_mut() {
            vp.sort_events();
        }
        for vp in self.servers.values_mut() {
            vp.sort_events();
        }
        for vp in self.observers.values_mut() {
            vp.sort_events();
        }
    }

    // ----- queries -----

    pub fn sim_id(&self) -> &SimId {
        &self.sim_id
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn filter(&self) -> Option<&TraceFilter> {
        self.filter.as_ref()
    }

    pub fn observer_flow_info(&self) -> &BTreeMap<FlowId, FiveTuple> {
        &self.observer_flow_info
    }

    pub fn host_conn_info(&self) -> &BTreeMap<ConnId, FiveTuple> {
        &self.host_conn_info
    }

    pub fn observer_path_info(&self) -> &BTreeMap<PathId, PathInfo> {
        &self.observer_path_info
    }

    pub fn failed_links(&self) -> &BTreeMap<Link, FailedLink> {
        &self.failed_links
    }

    pub fn failed_link(&self, src: NodeId, dst: NodeId) -> Option<&FailedLink> {
        self.failed_links.get(&Link::new(src, dst))
    }

    pub fn backbone_overrides(&self) -> &BTreeMap<Link, LinkConfig> {
        &self.backbone_overrides
    }

    pub fn edge_links(&self) -> &[Link] {
        &self.edge_links
    }

    pub fn core_links(&self) -> &[Link] {
        &self.core_links
    }

    /// All links of the topology: edge links followed by core links.
    pub fn all_links(&self) -> Vec<Link> {
        let mut links = Vec::with_capacity(self.edge_links.len() + self.core_links.len());
        links.extend_from_slice(&self.edge_links);
        links.extend_from_slice(&self.core_links);
        links
    }

    pub fn link_gt_stats(&self) -> &BTreeMap<Link, LinkStats> {
        &self.link_gt_stats
    }

    pub fn event_counts(&self) -> &BTreeMap<EventKind, u64> {
        &self.event_counts
    }

    pub fn flow_stats(&self, observer: NodeId, flow: FlowId) -> Result<FlowStats, SimDataError> {
        self.observer_flow_stats
            .get(&(observer, flow))
            .copied()
            .ok_or(SimDataError::MissingFlowStats { observer, flow })
    }

    pub fn client(&self, id: NodeId) -> Option<&HostVantagePoint> {
        self.clients.get(&id)
    }

    pub fn server(&self, id: NodeId) -> Option<&HostVantagePoint> {
        self.servers.get(&id)
    }

    pub fn observer(&self, id: NodeId) -> Option<&ObserverVantagePoint> {
        self.observers.get(&id)
    }

    pub fn observer_or_err(&self, id: NodeId) -> Result<&ObserverVantagePoint, SimDataError> {
        self.observers
            .get(&id)
            .ok_or(SimDataError::UnknownVantagePoint(id))
    }

    pub fn client_ids(&self, relevant_only: bool) -> BTreeSet<NodeId> {
        if relevant_only {
            self.clients
                .values()
                .filter(|vp| vp.event_count() > 0)
                .map(|vp| vp.node_id())
                .collect()
        } else {
            self.client_ids.clone()
        }
    }

    pub fn server_ids(&self, relevant_only: bool) -> BTreeSet<NodeId> {
        if relevant_only {
            self.servers
                .values()
                .filter(|vp| vp.event_count() > 0)
                .map(|vp| vp.node_id())
                .collect()
        } else {
            self.server_ids.clone()
        }
    }

    /// Observer ids. `relevant_only` keeps observers that recorded events,
    /// `real_only` drops observers colocated with an endhost.
    pub fn observer_ids(&self, relevant_only: bool, real_only: bool) -> BTreeSet<NodeId> {
        let mut ids: BTreeSet<NodeId> = if relevant_only {
            self.observers
                .values()
                .filter(|vp| vp.event_count() > 0)
                .map(|vp| vp.node_id())
                .collect()
        } else {
            self.observer_ids.clone()
        };
        if real_only {
            ids.retain(|id| !self.client_ids.contains(id) && !self.server_ids.contains(id));
        }
        ids
    }

    /// Flow ids recorded at one observer.
    pub fn observer_flow_ids(&self, observer: NodeId) -> Result<BTreeSet<FlowId>, SimDataError> {
        Ok(self.observer_or_err(observer)?.flow_ids().collect())
    }

    /// Flow ids recorded at one observer, restricted to a selection map.
    pub fn selected_observer_flow_ids(
        &self,
        observer: NodeId,
        selection: &BTreeMap<NodeId, BTreeSet<FlowId>>,
    ) -> Result<BTreeSet<FlowId>, SimDataError> {
        let selected = selection.get(&observer);
        Ok(self
            .observer_or_err(observer)?
            .flow_ids()
            .filter(|fid| selected.map_or(false, |s| s.contains(fid)))
            .collect())
    }

    /// The observer chain of a flow, ordered by observed begin time. The
    /// result may be empty when no observer recorded the flow.
    pub fn flow_path(&self, flow: FlowId) -> Result<Vec<NodeId>, SimDataError> {
        let mut by_begin: BTreeMap<NotNan<f64>, NodeId> = BTreeMap::new();
        for vp in self.observers.values() {
            let Some(obsv_flow) = vp.flow(flow) else {
                continue;
            };
            let begin = obsv_flow.flow_begin()?;
            let begin = NotNan::new(begin).map_err(|_| SimDataError::InvalidFlowBegin(flow))?;
            if by_begin.insert(begin, vp.node_id()).is_some() {
                return Err(SimDataError::DuplicateFlowBegin {
                    flow,
                    time: begin.into_inner(),
                });
            }
        }
        Ok(by_begin.into_values().collect())
    }

    /// The flow id carrying the reversed 5-tuple of `flow`.
    pub fn reverse_flow_id(&self, flow: FlowId) -> Result<FlowId, SimDataError> {
        let tuple = self
            .observer_flow_info
            .get(&flow)
            .ok_or(SimDataError::UnknownFlow(flow))?;
        let reversed = tuple.reversed();
        self.observer_flow_info
            .iter()
            .find(|(_, t)| **t == reversed)
            .map(|(&fid, _)| fid)
            .ok_or(SimDataError::NoReverseFlow(flow))
    }

    /// The source node of a flow per its 5-tuple.
    pub fn flow_source(&self, flow: FlowId) -> Result<NodeId, SimDataError> {
        self.observer_flow_info
            .get(&flow)
            .map(|t| t.source_node_id)
            .ok_or(SimDataError::UnknownFlow(flow))
    }

    /// The destination node of a flow per its 5-tuple.
    pub fn flow_dest(&self, flow: FlowId) -> Result<NodeId, SimDataError> {
        self.observer_flow_info
            .get(&flow)
            .map(|t| t.dest_node_id)
            .ok_or(SimDataError::UnknownFlow(flow))
    }

    /// The configured ping route between two nodes.
    pub fn ping_path(&self, src: NodeId, dst: NodeId) -> Result<&[NodeId], SimDataError> {
        self.ping_paths
            .get(&(src, dst))
            .map(Vec::as_slice)
            .ok_or(SimDataError::MissingPingPath { src, dst })
    }

    /// Produces a filtered copy of this result set. Vantage points are
    /// deep-cloned; the original stays usable.
    pub fn apply_filter(&self, filter: &TraceFilter) -> Self {
        let mut filtered = self.clone();
        filtered.filter = Some(*filter);
        filtered.clients = self
            .clients
            .iter()
            .map(|(&id, vp)| (id, vp.apply_filter(filter)))
            .collect();
        filtered.servers = self
            .servers
            .iter()
            .map(|(&id, vp)| (id, vp.apply_filter(filter)))
            .collect();
        filtered.observers = self
            .observers
            .iter()
            .map(|(&id, vp)| (id, vp.apply_filter(filter)))
            .collect();
        filtered
    }

    /// Logs the per-kind event totals of this run.
    pub fn log_event_counts(&self) {
        log::info!("event counts for run {}:", self.sim_id);
        for (kind, count) in &self.event_counts {
            log::info!("  {kind}: {count}");
        }
    }
}
