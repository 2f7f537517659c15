//! Sim-id keyed store of imported runs.

use std::collections::BTreeMap;
use std::path::Path;

use efmloc_simdata::{ResultSet, SimId};

use crate::errors::FrontendError;
use crate::import::{import_traces, result_set_from_summary, TraceDocument};

/// All runs imported so far, keyed by sim id.
#[derive(Debug, Default)]
pub struct RunStore {
    runs: BTreeMap<SimId, ResultSet>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports one trace file. Returns `true` when a new result set was
    /// created, `false` when the document appended to an existing one.
    pub fn import_file(&mut self, path: &Path) -> Result<bool, FrontendError> {
        let text = std::fs::read_to_string(path)?;
        let document: TraceDocument = serde_json::from_str(&text)?;
        self.import_document(document)
    }

    /// Imports one parsed document: a master creates a run, a fragment with
    /// `title_ref` extends one.
    pub fn import_document(&mut self, document: TraceDocument) -> Result<bool, FrontendError> {
        match (document.title, document.title_ref) {
            (Some(_), Some(_)) => Err(FrontendError::ConflictingTitle),
            (None, None) => Err(FrontendError::MissingTitle),
            (Some(sim_id), None) => {
                if self.runs.contains_key(&sim_id) {
                    return Err(FrontendError::DuplicateSimId(sim_id));
                }
                let summary = document
                    .summary
                    .ok_or_else(|| FrontendError::MissingSummary(sim_id.clone()))?;
                let mut srs = result_set_from_summary(&sim_id, summary)?;
                import_traces(&mut srs, document.traces)?;
                self.runs.insert(sim_id, srs);
                Ok(true)
            }
            (None, Some(sim_id)) => {
                let srs = self
                    .runs
                    .get_mut(&sim_id)
                    .ok_or(FrontendError::UnknownTitleRef(sim_id.clone()))?;
                import_traces(srs, document.traces)?;
                Ok(false)
            }
        }
    }

    pub fn result_set(&self, sim_id: &str) -> Option<&ResultSet> {
        self.runs.get(sim_id)
    }

    pub fn sim_ids(&self) -> impl Iterator<Item = &SimId> {
        self.runs.keys()
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn master(sim_id: &str) -> TraceDocument {
        serde_json::from_value(json!({
            "title": sim_id,
            "summary": {
                "client_stats": {"0": {}},
                "server_stats": {"2": {}},
                "observer_stats": {"1": {"7": {"total_packets": 100, "total_efm_packets": 90}}},
                "config": {"seed": 1},
                "failed_links": [{"nodeA": 0, "nodeB": 1, "lossRate": 0.2, "delayMs": 0}],
                "host_connections": {"1": {
                    "client_node_id": 0, "client_port": 1000,
                    "server_node_id": 2, "server_port": 443, "prot": 17
                }},
                "observer_flows": {"7": {
                    "src_node_id": 0, "src_port": 1000,
                    "dst_node_id": 2, "dst_port": 443, "prot": 17
                }},
                "link_sets": {
                    "core_links": [{"src": 1, "dst": 2}],
                    "edge_links": [{"src": 0, "dst": 1}]
                }
            },
            "traces": [{
                "vantage_point": {"name": "1/eth0", "type": "network"},
                "events": [
                    {"name": "efm_observer:flow_begin", "time": 0.5,
                     "group_id": {"flow_id": 7}, "data": {}},
                    {"name": "efm_observer:q_bit_loss", "time": 1.0,
                     "group_id": {"flow_id": 7}, "data": {"pkt_count": 64, "loss": 3}}
                ]
            }]
        }))
        .unwrap()
    }

    fn fragment(sim_id: &str) -> TraceDocument {
        serde_json::from_value(json!({
            "title_ref": sim_id,
            "traces": [{
                "vantage_point": {"name": "1/eth0", "type": "network"},
                "events": [
                    {"name": "efm_observer:q_bit_loss", "time": 2.0,
                     "group_id": {"flow_id": 7}, "data": {"pkt_count": 64, "loss": 1}}
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn master_then_fragment_accumulates_events() {
        let mut store = RunStore::new();
        assert!(store.import_document(master("run-1")).unwrap());
        assert!(!store.import_document(fragment("run-1")).unwrap());

        let srs = store.result_set("run-1").unwrap();
        let observer = srs
            .observer(efmloc_simdata::NodeId::new(1))
            .expect("observer imported");
        let flow = observer.flow(efmloc_simdata::FlowId::new(7)).unwrap();
        assert_eq!(flow.absolute_q_bit_loss(), 4);
        assert_eq!(srs.core_links().len(), 1);
        assert_eq!(srs.edge_links().len(), 1);
    }

    #[test]
    fn fragment_without_master_is_rejected() {
        let mut store = RunStore::new();
        assert!(matches!(
            store.import_document(fragment("nowhere")),
            Err(FrontendError::UnknownTitleRef(_))
        ));
    }

    #[test]
    fn duplicate_masters_are_rejected() {
        let mut store = RunStore::new();
        store.import_document(master("run-1")).unwrap();
        assert!(matches!(
            store.import_document(master("run-1")),
            Err(FrontendError::DuplicateSimId(_))
        ));
    }

    #[test]
    fn unknown_vantage_point_types_abort() {
        let mut store = RunStore::new();
        let doc: TraceDocument = serde_json::from_value(json!({
            "title": "run-2",
            "summary": {
                "client_stats": {}, "server_stats": {}, "observer_stats": {},
                "config": {}, "failed_links": [],
                "host_connections": {}, "observer_flows": {}
            },
            "traces": [{
                "vantage_point": {"name": "1/eth0", "type": "satellite"},
                "events": []
            }]
        }))
        .unwrap();
        assert!(matches!(
            store.import_document(doc),
            Err(FrontendError::UnknownVantagePointType(_))
        ));
    }
}
