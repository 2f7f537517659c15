//! The event model: tagged event records as emitted by the simulation's
//! vantage points, and the per-entity event store.

use rustc_hash::FxHashMap;

use crate::types::FlowId;

/// Every event kind a trace document can carry. The set is closed: importers
/// skip names outside this table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumIter,
    serde::Serialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // Host-side events
    HostGtTransDelay,
    HostGtAppDelay,
    HostSpinUpdate,
    HostLCounterUpdate,
    HostLSet,
    HostQUpdate,
    HostRUpdate,
    HostRBlockUpdate,
    HostTSet,
    HostTPhaseUpdate,
    // Observer-side events
    FlowBegin,
    SeqLoss,
    AckSeqLoss,
    SpinEdge,
    SpinDelay,
    LSet,
    QChange,
    QLoss,
    RChange,
    RLoss,
    TSet,
    TPhaseUpdate,
    TFullLoss,
    THalfLoss,
    PathLSet,
    PathSqLoss,
    TcpDartDelay,
    TcpReordering,
    // Active measurement events
    PingRtDelay,
    PingEteDelay,
    PingRtLoss,
    PingEteLoss,
}

impl EventKind {
    /// Resolves the event name used on the wire, or `None` for names outside
    /// the closed set.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        use EventKind::*;
        let kind = match name {
            "efm_host:groundtruth_trans_delay" => HostGtTransDelay,
            "efm_host:groundtruth_app_delay" => HostGtAppDelay,
            "efm_host:spin_bit_update" => HostSpinUpdate,
            "efm_host:l_bit_counter_update" => HostLCounterUpdate,
            "efm_host:l_bit_set" => HostLSet,
            "efm_host:q_bit_update" => HostQUpdate,
            "efm_host:r_bit_update" => HostRUpdate,
            "efm_host:r_bit_block_update" => HostRBlockUpdate,
            "efm_host:t_bit_set" => HostTSet,
            "efm_host:t_bit_phase_update" => HostTPhaseUpdate,
            "efm_observer:flow_begin" => FlowBegin,
            "efm_observer:seq_loss" => SeqLoss,
            "efm_observer:ack_seq_loss" => AckSeqLoss,
            "efm_observer:spin_bit_edge" => SpinEdge,
            "efm_observer:spin_bit_delay" => SpinDelay,
            "efm_observer:l_bit_set" => LSet,
            "efm_observer:q_bit_change" => QChange,
            "efm_observer:q_bit_loss" => QLoss,
            "efm_observer:r_bit_change" => RChange,
            "efm_observer:r_bit_loss" => RLoss,
            "efm_observer:t_bit_set" => TSet,
            "efm_observer:t_bit_phase_update" => TPhaseUpdate,
            "efm_observer:t_bit_loss_full" => TFullLoss,
            "efm_observer:t_bit_loss_half" => THalfLoss,
            "efm_observer:p_l_bit_set" => PathLSet,
            "efm_observer:p_sq_bits_loss" => PathSqLoss,
            "efm_observer:tcp_dart_delay" => TcpDartDelay,
            "efm_observer:tcp_reordering" => TcpReordering,
            "ping:rt_delay" => PingRtDelay,
            "ping:ete_delay" => PingEteDelay,
            "ping:rt_loss" => PingRtLoss,
            "ping:ete_loss" => PingEteLoss,
            _ => return None,
        };
        Some(kind)
    }
}

/// T-bit phase as seen by the traffic-generating host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum TBitClientPhase {
    Gen1,
    Gen2,
    PauseGen,
    Ref1,
    Ref2,
    PauseRef,
    Error,
}

impl TBitClientPhase {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "gen1" => Self::Gen1,
            "gen2" => Self::Gen2,
            "gen_pause" => Self::PauseGen,
            "ref1" => Self::Ref1,
            "ref2" => Self::Ref2,
            "ref_pause" => Self::PauseRef,
            _ => Self::Error,
        }
    }
}

/// T-bit phase as reconstructed by an in-network observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum TBitObserverPhase {
    Gen,
    PauseBeginGen,
    PauseFullGen,
    Ref,
    PauseBeginRef,
    PauseFullRef,
    Error,
}

impl TBitObserverPhase {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "gen" => Self::Gen,
            "gen_pause_begin" => Self::PauseBeginGen,
            "gen_pause_full" => Self::PauseFullGen,
            "ref" => Self::Ref,
            "ref_pause_begin" => Self::PauseBeginRef,
            "ref_pause_full" => Self::PauseFullRef,
            _ => Self::Error,
        }
    }
}

/// Per-kind payload of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    None,
    BitSet {
        seq: u32,
    },
    BitSetPCount {
        pkt_count: u32,
        seq: u32,
    },
    BitUpdate {
        new_state: bool,
        seq: u32,
    },
    LCounterUpdate {
        old_value: u32,
        new_value: u32,
    },
    RBlockLenUpdate {
        new_length: u32,
    },
    HostTPhase {
        old_phase: TBitClientPhase,
        new_phase: TBitClientPhase,
    },
    ObserverTPhase {
        old_phase: TBitObserverPhase,
        new_phase: TBitObserverPhase,
        gen_train_length: Option<u32>,
        ref_train_length: Option<u32>,
    },
    DelayMeasurement {
        full_delay_ms: u32,
        half_delay_ms: Option<u32>,
    },
    LossMeasurement {
        pkt_count: u32,
        loss: u32,
    },
    SignedLossMeasurement {
        pkt_count: u32,
        loss: i32,
    },
}

/// One event record. Events are created during import and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Simulation time in seconds.
    pub time: f64,
    pub flow_id: FlowId,
    pub data: EventData,
}

impl Event {
    pub fn new(kind: EventKind, time: f64, flow_id: FlowId, data: EventData) -> Self {
        Self {
            kind,
            time,
            flow_id,
            data,
        }
    }

    /// Payload as a loss measurement, if it is one.
    pub fn loss_measurement(&self) -> Option<(u32, u32)> {
        match self.data {
            EventData::LossMeasurement { pkt_count, loss } => Some((pkt_count, loss)),
            _ => None,
        }
    }

    /// Payload as a signed loss measurement, if it is one.
    pub fn signed_loss_measurement(&self) -> Option<(u32, i32)> {
        match self.data {
            EventData::SignedLossMeasurement { pkt_count, loss } => Some((pkt_count, loss)),
            _ => None,
        }
    }

    /// Payload as a delay measurement, if it is one.
    pub fn delay_measurement(&self) -> Option<(u32, Option<u32>)> {
        match self.data {
            EventData::DelayMeasurement {
                full_delay_ms,
                half_delay_ms,
            } => Some((full_delay_ms, half_delay_ms)),
            _ => None,
        }
    }

    /// Packet count of a bit-set payload, if present.
    pub fn bit_set_pkt_count(&self) -> Option<u32> {
        match self.data {
            EventData::BitSetPCount { pkt_count, .. } => Some(pkt_count),
            _ => None,
        }
    }

    pub fn is_path_event(&self) -> bool {
        matches!(self.kind, EventKind::PathLSet | EventKind::PathSqLoss)
    }

    pub fn is_ping_client_event(&self) -> bool {
        matches!(self.kind, EventKind::PingRtLoss | EventKind::PingRtDelay)
    }

    pub fn is_ping_server_event(&self) -> bool {
        matches!(self.kind, EventKind::PingEteLoss | EventKind::PingEteDelay)
    }
}

/// Multiset of events for one entity, bucketed by kind and ordered by time
/// within each bucket. Equal times keep their insertion order.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    map: FxHashMap<EventKind, Vec<Event>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: Event) {
        self.map.entry(event.kind).or_default().push(event);
    }

    /// Restores the by-time ordering after a batch of inserts.
    pub fn sort(&mut self) {
        for events in self.map.values_mut() {
            events.sort_by(|a, b| a.time.total_cmp(&b.time));
        }
    }

    /// All events of one kind, ordered by time. Empty if the kind never
    /// occurred.
    pub fn events(&self, kind: EventKind) -> &[Event] {
        self.map.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The final (latest) event of one kind.
    pub fn last(&self, kind: EventKind) -> Option<&Event> {
        self.events(kind).last()
    }

    pub fn count(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    pub(crate) fn events_mut(&mut self, kind: EventKind) -> Option<&mut Vec<Event>> {
        self.map.get_mut(&kind)
    }

    pub(crate) fn remove(&mut self, kind: EventKind) {
        self.map.remove(&kind);
    }

    delegate::delegate! {
        to self.map {
            #[call(contains_key)]
            pub fn has(&self, kind: &EventKind) -> bool;

            #[call(is_empty)]
            pub fn is_empty(&self) -> bool;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss_event(kind: EventKind, time: f64, pkt_count: u32, loss: u32) -> Event {
        Event::new(
            kind,
            time,
            FlowId::new(1),
            EventData::LossMeasurement { pkt_count, loss },
        )
    }

    #[test]
    fn store_orders_by_time() {
        let mut store = EventStore::new();
        store.add(loss_event(EventKind::QLoss, 2.0, 64, 1));
        store.add(loss_event(EventKind::QLoss, 1.0, 64, 2));
        store.add(loss_event(EventKind::QLoss, 1.5, 64, 3));
        store.sort();
        let times = store
            .events(EventKind::QLoss)
            .iter()
            .map(|e| e.time)
            .collect::<Vec<_>>();
        assert_eq!(times, vec![1.0, 1.5, 2.0]);
        assert_eq!(store.last(EventKind::QLoss).unwrap().time, 2.0);
    }

    #[test]
    fn equal_times_keep_insertion_order() {
        let mut store = EventStore::new();
        store.add(loss_event(EventKind::SeqLoss, 1.0, 10, 1));
        store.add(loss_event(EventKind::SeqLoss, 1.0, 20, 2));
        store.sort();
        let counts = store
            .events(EventKind::SeqLoss)
            .iter()
            .map(|e| e.loss_measurement().unwrap().0)
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![10, 20]);
    }

    #[test]
    fn wire_names_round_trip_known_kinds() {
        assert_eq!(
            EventKind::from_wire_name("efm_observer:q_bit_loss"),
            Some(EventKind::QLoss)
        );
        assert_eq!(
            EventKind::from_wire_name("ping:ete_delay"),
            Some(EventKind::PingEteDelay)
        );
        assert_eq!(EventKind::from_wire_name("efm_observer:unheard_of"), None);
    }
}
