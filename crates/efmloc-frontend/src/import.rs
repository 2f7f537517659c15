//! The trace-document model and its translation into the simulation data
//! model.

use std::collections::BTreeMap;

use serde::Deserialize;

use efmloc_simdata::{
    ConnId, Event, EventData, EventKind, FailedLink, FiveTuple, FlowId, FlowStats, Link,
    LinkConfig, LinkStats, NodeId, PathId, PathInfo, ResultSet, TBitClientPhase, TBitObserverPhase,
    VantagePointKind,
};

use crate::errors::FrontendError;

/// One trace document: either a master (title + summary) or a fragment
/// referencing a previously imported master.
#[derive(Debug, Deserialize)]
pub struct TraceDocument {
    pub title: Option<String>,
    pub title_ref: Option<String>,
    pub summary: Option<SummaryDoc>,
    #[serde(default)]
    pub traces: Vec<TraceDoc>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryDoc {
    pub client_stats: BTreeMap<String, serde_json::Value>,
    pub server_stats: BTreeMap<String, serde_json::Value>,
    pub observer_stats: BTreeMap<String, BTreeMap<String, FlowStatsDoc>>,
    pub config: serde_json::Value,
    pub failed_links: Vec<FailedLinkDoc>,
    pub host_connections: BTreeMap<String, HostConnDoc>,
    pub observer_flows: BTreeMap<String, ObserverFlowDoc>,
    pub observer_paths: Option<BTreeMap<String, ObserverPathDoc>>,
    pub ping_routes: Option<BTreeMap<String, Vec<u32>>>,
    pub link_sets: Option<LinkSetsDoc>,
    pub gt_stats: Option<Vec<GtStatDoc>>,
    pub backbone_overrides: Option<Vec<BackboneOverrideDoc>>,
}

#[derive(Debug, Deserialize)]
pub struct FlowStatsDoc {
    pub total_packets: u32,
    pub total_efm_packets: u32,
}

#[derive(Debug, Deserialize)]
pub struct FailedLinkDoc {
    #[serde(rename = "nodeA")]
    pub node_a: u32,
    #[serde(rename = "nodeB")]
    pub node_b: u32,
    #[serde(rename = "lossRate")]
    pub loss_rate: f64,
    #[serde(rename = "delayMs")]
    pub delay_ms: u32,
}

#[derive(Debug, Deserialize)]
pub struct BackboneOverrideDoc {
    #[serde(rename = "nodeA")]
    pub node_a: u32,
    #[serde(rename = "nodeB")]
    pub node_b: u32,
    #[serde(rename = "delayMus")]
    pub delay_mus: u32,
}

#[derive(Debug, Deserialize)]
pub struct HostConnDoc {
    pub client_node_id: u32,
    pub client_port: u16,
    pub server_node_id: u32,
    pub server_port: u16,
    pub prot: u8,
}

#[derive(Debug, Deserialize)]
pub struct ObserverFlowDoc {
    pub src_node_id: u32,
    pub src_port: u16,
    pub dst_node_id: u32,
    pub dst_port: u16,
    pub prot: u8,
}

#[derive(Debug, Deserialize)]
pub struct ObserverPathDoc {
    pub src_net_addr: String,
    pub dst_net_addr: String,
    pub src_node_ids: Vec<u32>,
    pub dst_node_ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LinkSetsDoc {
    pub core_links: Vec<LinkDoc>,
    pub edge_links: Vec<LinkDoc>,
}

#[derive(Debug, Deserialize)]
pub struct LinkDoc {
    pub src: u32,
    pub dst: u32,
}

#[derive(Debug, Deserialize)]
pub struct GtStatDoc {
    pub src: u32,
    pub dst: u32,
    pub lost: u32,
    pub recv: u32,
    pub dy_avg: Option<f64>,
    pub dy_std: Option<f64>,
    pub dy_med: Option<f64>,
    pub dy_99: Option<f64>,
    pub dy_min: Option<u32>,
    pub dy_max: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TraceDoc {
    pub vantage_point: VantagePointDoc,
    #[serde(default)]
    pub events: Vec<EventDoc>,
}

#[derive(Debug, Deserialize)]
pub struct VantagePointDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct EventDoc {
    pub name: String,
    pub time: f64,
    pub group_id: GroupIdDoc,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct GroupIdDoc {
    pub flow_id: u32,
}

fn id_key(key: &str) -> Result<u32, FrontendError> {
    key.parse()
        .map_err(|_| FrontendError::InvalidIdKey(key.to_owned()))
}

/// Builds a fresh result set from a master document's summary.
pub fn result_set_from_summary(
    sim_id: &str,
    summary: SummaryDoc,
) -> Result<ResultSet, FrontendError> {
    let mut srs = ResultSet::new(sim_id, summary.config);

    for key in summary.client_stats.keys() {
        srs.register_client(NodeId::new(id_key(key)?));
    }
    for key in summary.server_stats.keys() {
        srs.register_server(NodeId::new(id_key(key)?));
    }
    for (observer_key, flows) in &summary.observer_stats {
        let observer = NodeId::new(id_key(observer_key)?);
        srs.register_observer(observer);
        for (flow_key, stats) in flows {
            srs.set_flow_stats(
                observer,
                FlowId::new(id_key(flow_key)?),
                FlowStats {
                    total_packets: stats.total_packets,
                    total_efm_packets: stats.total_efm_packets,
                },
            );
        }
    }

    for fl in &summary.failed_links {
        srs.add_failed_link(FailedLink {
            source_node_id: NodeId::new(fl.node_a),
            dest_node_id: NodeId::new(fl.node_b),
            loss_rate: fl.loss_rate,
            delay_ms: fl.delay_ms,
        });
    }

    for (conn_key, conn) in &summary.host_connections {
        srs.add_host_connection(
            ConnId::new(id_key(conn_key)?),
            FiveTuple {
                source_node_id: NodeId::new(conn.client_node_id),
                dest_node_id: NodeId::new(conn.server_node_id),
                source_port: conn.client_port,
                dest_port: conn.server_port,
                protocol: conn.prot,
            },
        );
    }

    for (flow_key, flow) in &summary.observer_flows {
        srs.add_observer_flow_info(
            FlowId::new(id_key(flow_key)?),
            FiveTuple {
                source_node_id: NodeId::new(flow.src_node_id),
                dest_node_id: NodeId::new(flow.dst_node_id),
                source_port: flow.src_port,
                dest_port: flow.dst_port,
                protocol: flow.prot,
            },
        );
    }

    match summary.observer_paths {
        Some(paths) => {
            for (path_key, info) in paths {
                srs.add_observer_path_info(
                    PathId::new(id_key(&path_key)?),
                    PathInfo {
                        source_net: info.src_net_addr,
                        dest_net: info.dst_net_addr,
                        source_node_ids: info.src_node_ids.into_iter().map(NodeId::new).collect(),
                        dest_node_ids: info.dst_node_ids.into_iter().map(NodeId::new).collect(),
                    },
                );
            }
        }
        None => log::warn!("summary has no observer_paths section"),
    }

    match summary.ping_routes {
        Some(routes) => {
            for (pair_key, route) in routes {
                let (src, dst) = pair_key
                    .split_once('/')
                    .ok_or_else(|| FrontendError::InvalidIdKey(pair_key.clone()))?;
                srs.add_ping_route(
                    NodeId::new(id_key(src)?),
                    NodeId::new(id_key(dst)?),
                    route.into_iter().map(NodeId::new).collect(),
                );
            }
        }
        None => log::warn!("summary has no ping_routes section"),
    }

    match summary.link_sets {
        Some(sets) => {
            for link in sets.core_links {
                srs.add_core_link(Link::new(NodeId::new(link.src), NodeId::new(link.dst)));
            }
            for link in sets.edge_links {
                srs.add_edge_link(Link::new(NodeId::new(link.src), NodeId::new(link.dst)));
            }
        }
        None => log::warn!("summary has no link_sets section"),
    }

    match summary.gt_stats {
        Some(stats) => {
            for gt in stats {
                srs.set_link_gt_stats(
                    Link::new(NodeId::new(gt.src), NodeId::new(gt.dst)),
                    LinkStats {
                        lost_packets: gt.lost,
                        received_packets: gt.recv,
                        delay_avg_mus: gt.dy_avg,
                        delay_std_mus: gt.dy_std,
                        delay_med_mus: gt.dy_med,
                        delay_99th_mus: gt.dy_99,
                        delay_min_mus: gt.dy_min,
                        delay_max_mus: gt.dy_max,
                    },
                );
            }
        }
        None => log::warn!("summary has no gt_stats section"),
    }

    if let Some(overrides) = summary.backbone_overrides {
        for ov in overrides {
            srs.add_backbone_override(LinkConfig {
                source_node_id: NodeId::new(ov.node_a),
                dest_node_id: NodeId::new(ov.node_b),
                delay_mus: ov.delay_mus,
            });
        }
    }

    Ok(srs)
}

/// Imports the traces of one document into a result set. Returns the number
/// of events skipped for unknown names.
pub fn import_traces(srs: &mut ResultSet, traces: Vec<TraceDoc>) -> Result<u64, FrontendError> {
    let mut skipped = 0u64;
    for trace in traces {
        let name = &trace.vantage_point.name;
        let node_id = name
            .split('/')
            .next()
            .and_then(|id| id.parse::<u32>().ok())
            .map(NodeId::new)
            .ok_or_else(|| FrontendError::BadVantagePointName(name.clone()))?;
        let kind = VantagePointKind::from_wire(&trace.vantage_point.kind).ok_or_else(|| {
            FrontendError::UnknownVantagePointType(trace.vantage_point.kind.clone())
        })?;

        for doc in trace.events {
            match parse_event(doc)? {
                Some(event) => srs.add_trace_event(kind, node_id, event)?,
                None => skipped += 1,
            }
        }
    }
    srs.finish_import();
    if skipped > 0 {
        log::warn!("skipped {skipped} events with unknown names");
    }
    Ok(skipped)
}

#[derive(Debug, Deserialize)]
struct UpdateData {
    new_state: bool,
    seq: u32,
}

#[derive(Debug, Deserialize)]
struct SeqData {
    seq: u32,
}

#[derive(Debug, Deserialize)]
struct PCountData {
    pkt_count: u32,
    seq: u32,
}

#[derive(Debug, Deserialize)]
struct LCounterData {
    old_value: u32,
    new_value: u32,
}

#[derive(Debug, Deserialize)]
struct RBlockData {
    new_length: u32,
}

#[derive(Debug, Deserialize)]
struct HostPhaseData {
    old_phase: String,
    new_phase: String,
}

#[derive(Debug, Deserialize)]
struct ObserverPhaseData {
    old_phase: String,
    new_phase: String,
    gen_train_length: Option<u32>,
    ref_train_length: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DelayData {
    full_delay_ms: u32,
    half_delay_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LossData {
    pkt_count: u32,
    loss: u32,
}

#[derive(Debug, Deserialize)]
struct SignedLossData {
    pkt_count: u32,
    loss: i32,
}

/// Translates one event record. `None` for names outside the closed set.
pub fn parse_event(doc: EventDoc) -> Result<Option<Event>, FrontendError> {
    use EventKind::*;

    let Some(kind) = EventKind::from_wire_name(&doc.name) else {
        return Ok(None);
    };
    let flow_id = FlowId::new(doc.group_id.flow_id);

    let data = match kind {
        FlowBegin => EventData::None,
        HostSpinUpdate | HostQUpdate | HostRUpdate | SpinEdge | QChange | RChange => {
            let UpdateData { new_state, seq } = serde_json::from_value(doc.data)?;
            EventData::BitUpdate { new_state, seq }
        }
        HostLSet | HostTSet | TSet => {
            let SeqData { seq } = serde_json::from_value(doc.data)?;
            EventData::BitSet { seq }
        }
        LSet | PathLSet => {
            let PCountData { pkt_count, seq } = serde_json::from_value(doc.data)?;
            EventData::BitSetPCount { pkt_count, seq }
        }
        HostLCounterUpdate => {
            let LCounterData {
                old_value,
                new_value,
            } = serde_json::from_value(doc.data)?;
            EventData::LCounterUpdate {
                old_value,
                new_value,
            }
        }
        HostRBlockUpdate => {
            let RBlockData { new_length } = serde_json::from_value(doc.data)?;
            EventData::RBlockLenUpdate { new_length }
        }
        HostTPhaseUpdate => {
            let HostPhaseData {
                old_phase,
                new_phase,
            } = serde_json::from_value(doc.data)?;
            EventData::HostTPhase {
                old_phase: TBitClientPhase::from_wire(&old_phase),
                new_phase: TBitClientPhase::from_wire(&new_phase),
            }
        }
        TPhaseUpdate => {
            let ObserverPhaseData {
                old_phase,
                new_phase,
                gen_train_length,
                ref_train_length,
            } = serde_json::from_value(doc.data)?;
            EventData::ObserverTPhase {
                old_phase: TBitObserverPhase::from_wire(&old_phase),
                new_phase: TBitObserverPhase::from_wire(&new_phase),
                gen_train_length,
                ref_train_length,
            }
        }
        SpinDelay | HostGtTransDelay | HostGtAppDelay | TcpDartDelay | PingRtDelay
        | PingEteDelay => {
            let DelayData {
                full_delay_ms,
                half_delay_ms,
            } = serde_json::from_value(doc.data)?;
            EventData::DelayMeasurement {
                full_delay_ms,
                half_delay_ms,
            }
        }
        QLoss | RLoss | SeqLoss | AckSeqLoss | TFullLoss | THalfLoss | TcpReordering
        | PingRtLoss | PingEteLoss => {
            let LossData { pkt_count, loss } = serde_json::from_value(doc.data)?;
            EventData::LossMeasurement { pkt_count, loss }
        }
        PathSqLoss => {
            let SignedLossData { pkt_count, loss } = serde_json::from_value(doc.data)?;
            EventData::SignedLossMeasurement { pkt_count, loss }
        }
    };

    Ok(Some(Event::new(kind, doc.time, flow_id, data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_doc(name: &str, data: serde_json::Value) -> EventDoc {
        EventDoc {
            name: name.into(),
            time: 1.5,
            group_id: GroupIdDoc { flow_id: 3 },
            data,
        }
    }

    #[test]
    fn loss_events_parse() {
        let ev = parse_event(event_doc(
            "efm_observer:q_bit_loss",
            json!({"pkt_count": 64, "loss": 2}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(ev.kind, EventKind::QLoss);
        assert_eq!(ev.loss_measurement(), Some((64, 2)));
        assert_eq!(ev.flow_id, FlowId::new(3));
    }

    #[test]
    fn optional_half_delay_is_optional() {
        let with = parse_event(event_doc(
            "efm_observer:spin_bit_delay",
            json!({"full_delay_ms": 12, "half_delay_ms": 5}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(with.delay_measurement(), Some((12, Some(5))));

        let without = parse_event(event_doc(
            "efm_observer:spin_bit_delay",
            json!({"full_delay_ms": 12}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(without.delay_measurement(), Some((12, None)));
    }

    #[test]
    fn unknown_event_names_are_skipped() {
        let parsed = parse_event(event_doc("efm_observer:not_a_thing", json!({}))).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn t_phase_strings_map_to_phases() {
        let ev = parse_event(event_doc(
            "efm_observer:t_bit_phase_update",
            json!({"old_phase": "gen", "new_phase": "ref", "gen_train_length": 7}),
        ))
        .unwrap()
        .unwrap();
        match ev.data {
            EventData::ObserverTPhase {
                old_phase,
                new_phase,
                gen_train_length,
                ref_train_length,
            } => {
                assert_eq!(old_phase, TBitObserverPhase::Gen);
                assert_eq!(new_phase, TBitObserverPhase::Ref);
                assert_eq!(gen_train_length, Some(7));
                assert_eq!(ref_train_length, None);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
