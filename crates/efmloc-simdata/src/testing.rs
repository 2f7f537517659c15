//! Utilities for writing tests against canned result sets.

use crate::events::{Event, EventData, EventKind};
use crate::result_set::ResultSet;
use crate::types::{FiveTuple, FlowId, FlowStats, NodeId};
use crate::vantage::VantagePointKind;

/// An empty result set with a fixed sim id.
pub fn empty_result_set() -> ResultSet {
    ResultSet::new("test-run", serde_json::json!({}))
}

/// A UDP 5-tuple between two nodes with fixed ports.
pub fn tuple(src: u32, dst: u32) -> FiveTuple {
    FiveTuple {
        source_node_id: NodeId::new(src),
        dest_node_id: NodeId::new(dst),
        source_port: 1000,
        dest_port: 2000,
        protocol: 17,
    }
}

/// Registers a forward/reverse flow pair observed along `nodes`: flow info
/// for both directions plus flow-begin events at every node, ordered along
/// the path for the forward flow and against it for the reverse flow.
pub fn register_flow_pair(
    srs: &mut ResultSet,
    forward: FlowId,
    reverse: FlowId,
    nodes: &[NodeId],
    five_tuple: FiveTuple,
) {
    srs.add_observer_flow_info(forward, five_tuple);
    srs.add_observer_flow_info(reverse, five_tuple.reversed());
    for (i, &node) in nodes.iter().enumerate() {
        add_observer_event(
            srs,
            node,
            Event::new(
                EventKind::FlowBegin,
                1.0 + i as f64 * 0.001,
                forward,
                EventData::None,
            ),
        );
    }
    for (i, &node) in nodes.iter().rev().enumerate() {
        add_observer_event(
            srs,
            node,
            Event::new(
                EventKind::FlowBegin,
                1.0 + i as f64 * 0.001,
                reverse,
                EventData::None,
            ),
        );
    }
}

/// Sets identical flow stats for one flow at every node of its path.
pub fn set_stats_on_path(
    srs: &mut ResultSet,
    flow: FlowId,
    nodes: &[NodeId],
    total_packets: u32,
    total_efm_packets: u32,
) {
    for &node in nodes {
        srs.set_flow_stats(
            node,
            flow,
            FlowStats {
                total_packets,
                total_efm_packets,
            },
        );
    }
}

/// Stores one event at a network observer, panicking on routing errors
/// (which would be a bug in the test setup).
pub fn add_observer_event(srs: &mut ResultSet, observer: NodeId, event: Event) {
    srs.add_trace_event(VantagePointKind::Network, observer, event)
        .expect("event routing in test setup");
}

/// A cumulative seq-loss snapshot event.
pub fn seq_loss(flow: FlowId, time: f64, pkt_count: u32, loss: u32) -> Event {
    Event::new(
        EventKind::SeqLoss,
        time,
        flow,
        EventData::LossMeasurement { pkt_count, loss },
    )
}

/// A Q-bit block loss measurement event.
pub fn q_loss(flow: FlowId, time: f64, loss: u32) -> Event {
    Event::new(
        EventKind::QLoss,
        time,
        flow,
        EventData::LossMeasurement {
            pkt_count: crate::flow::EFM_Q_BLOCK_SIZE,
            loss,
        },
    )
}

/// A T-bit half-round-trip loss measurement event.
pub fn t_half_loss(flow: FlowId, time: f64, pkt_count: u32, loss: u32) -> Event {
    Event::new(
        EventKind::THalfLoss,
        time,
        flow,
        EventData::LossMeasurement { pkt_count, loss },
    )
}

/// A T-bit full-round-trip loss measurement event.
pub fn t_full_loss(flow: FlowId, time: f64, pkt_count: u32, loss: u32) -> Event {
    Event::new(
        EventKind::TFullLoss,
        time,
        flow,
        EventData::LossMeasurement { pkt_count, loss },
    )
}

/// A spin-bit delay sample, optionally carrying the half (end-to-end) delay.
pub fn spin_delay(flow: FlowId, time: f64, full_ms: u32, half_ms: Option<u32>) -> Event {
    Event::new(
        EventKind::SpinDelay,
        time,
        flow,
        EventData::DelayMeasurement {
            full_delay_ms: full_ms,
            half_delay_ms: half_ms,
        },
    )
}
