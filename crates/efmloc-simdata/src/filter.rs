//! Post-hoc transformations of observer event sets.
//!
//! Filters never mutate a result set in place: [`crate::ResultSet::apply_filter`]
//! deep-clones the vantage points and reruns these routines on each flow's
//! event store.

use crate::events::{Event, EventData, EventKind, EventStore};

/// The trace filter requested by an analysis configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TraceFilter {
    #[serde(rename = "lBitTriggeredMonitoring")]
    pub l_bit_triggered_monitoring: bool,
    #[serde(rename = "removeLastXSpinTransients")]
    pub remove_last_spin_transients: u32,
}

impl TraceFilter {
    pub fn is_default(&self) -> bool {
        !self.l_bit_triggered_monitoring && self.remove_last_spin_transients == 0
    }
}

/// Observer event kinds affected by L-bit-triggered monitoring. Ground-truth
/// seq-loss and ack-seq-loss stay untouched so the ground truth remains
/// comparable across filters.
const L_TRIGGERED_KINDS: [EventKind; 9] = [
    EventKind::LSet,
    EventKind::QChange,
    EventKind::QLoss,
    EventKind::RChange,
    EventKind::RLoss,
    EventKind::TSet,
    EventKind::TPhaseUpdate,
    EventKind::TFullLoss,
    EventKind::THalfLoss,
];

/// Applies the configured filters to an observer-side event store.
pub(crate) fn filter_observer_events(store: &mut EventStore, filter: &TraceFilter) {
    if filter.l_bit_triggered_monitoring {
        filter_l_bit_triggered_monitoring(store);
    }
    if filter.remove_last_spin_transients > 0 {
        filter_last_spin_transients(store, filter.remove_last_spin_transients);
    }
}

fn filter_l_bit_triggered_monitoring(store: &mut EventStore) {
    let trigger = match store.events(EventKind::LSet).first() {
        Some(ev) => ev.clone(),
        None => {
            // Monitoring never armed: the passive loss measurements are
            // meaningless for this flow.
            for kind in L_TRIGGERED_KINDS {
                store.remove(kind);
            }
            return;
        }
    };

    let monitor_begin = trigger.time;
    // The first L-bit-set event counts as the first observed packet.
    let pkt_offset = trigger.bit_set_pkt_count().unwrap_or(1).saturating_sub(1);

    for kind in L_TRIGGERED_KINDS {
        let Some(events) = store.events_mut(kind) else {
            continue;
        };
        events.retain(|ev| ev.time >= monitor_begin);

        match kind {
            EventKind::LSet => {
                for ev in events.iter_mut() {
                    rebase_pkt_count(ev, pkt_offset);
                }
            }
            EventKind::QLoss | EventKind::RLoss | EventKind::TFullLoss | EventKind::THalfLoss => {
                // The first surviving measurement spans the pre-arm block and
                // is discarded entirely.
                if !events.is_empty() {
                    events.remove(0);
                }
                for ev in events.iter_mut() {
                    rebase_pkt_count(ev, pkt_offset);
                }
            }
            _ => {}
        }
    }
}

fn rebase_pkt_count(ev: &mut Event, offset: u32) {
    match &mut ev.data {
        EventData::LossMeasurement { pkt_count, .. }
        | EventData::BitSetPCount { pkt_count, .. } => {
            *pkt_count = pkt_count.saturating_sub(offset);
        }
        _ => {}
    }
}

fn filter_last_spin_transients(store: &mut EventStore, transient_count: u32) {
    for kind in [EventKind::SpinDelay, EventKind::SpinEdge] {
        if let Some(events) = store.events_mut(kind) {
            let keep = events.len().saturating_sub(transient_count as usize);
            events.truncate(keep);
        }
    }
}
