//! Per-flow aggregates: pure derivations of loss and delay metrics from a
//! flow's event store.

use crate::errors::SimDataError;
use crate::events::{Event, EventKind, EventStore};
use crate::filter::{filter_observer_events, TraceFilter};
use crate::types::FlowId;

/// Q and R blocks always span 64 packets on the wire.
pub const EFM_Q_BLOCK_SIZE: u32 = 64;

/// One directed flow recorded at one in-network observer.
#[derive(Debug, Clone)]
pub struct ObserverFlow {
    flow_id: FlowId,
    events: EventStore,
}

impl ObserverFlow {
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            events: EventStore::new(),
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.add(event);
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub(crate) fn sort_events(&mut self) {
        self.events.sort();
    }

    /// Produces a filtered copy of this flow. The original is untouched.
    pub fn apply_filter(&self, filter: &TraceFilter) -> Self {
        let mut filtered = self.clone();
        filter_observer_events(&mut filtered.events, filter);
        filtered
    }

    /// Time at which this observer first saw the flow.
    pub fn flow_begin(&self) -> Result<f64, SimDataError> {
        let begins = self.events.events(EventKind::FlowBegin);
        match begins {
            [] => Err(SimDataError::MissingFlowBegin(self.flow_id)),
            [ev] => Ok(ev.time),
            _ => Err(SimDataError::MultipleFlowBegin(self.flow_id)),
        }
    }

    // ----- spin bit -----

    /// Spin round-trip delay samples below the time filter, in order.
    pub fn raw_spin_rt_values(&self, time_filter: f64) -> impl Iterator<Item = f64> + '_ {
        self.events
            .events(EventKind::SpinDelay)
            .iter()
            .filter(move |ev| ev.time < time_filter)
            .filter_map(|ev| ev.delay_measurement())
            .map(|(full, _)| f64::from(full))
    }

    pub fn avg_spin_rt_delay(&self, time_filter: f64) -> Option<f64> {
        mean(self.raw_spin_rt_values(time_filter))
    }

    pub fn min_spin_rt_delay(&self, time_filter: f64) -> Option<u32> {
        self.spin_full_delays(time_filter).min()
    }

    pub fn max_spin_rt_delay(&self, time_filter: f64) -> Option<u32> {
        self.spin_full_delays(time_filter).max()
    }

    fn spin_full_delays(&self, time_filter: f64) -> impl Iterator<Item = u32> + '_ {
        self.events
            .events(EventKind::SpinDelay)
            .iter()
            .filter(move |ev| ev.time < time_filter)
            .filter_map(|ev| ev.delay_measurement())
            .map(|(full, _)| full)
    }

    /// End-to-end spin delay uses the half-delay payload; samples without it
    /// are skipped from numerator and denominator alike.
    fn spin_half_delays(&self, time_filter: f64) -> impl Iterator<Item = u32> + '_ {
        self.events
            .events(EventKind::SpinDelay)
            .iter()
            .filter(move |ev| ev.time < time_filter)
            .filter_map(|ev| ev.delay_measurement())
            .filter_map(|(_, half)| half)
    }

    pub fn avg_spin_ete_delay(&self, time_filter: f64) -> Option<f64> {
        mean(self.spin_half_delays(time_filter).map(f64::from))
    }

    pub fn min_spin_ete_delay(&self, time_filter: f64) -> Option<u32> {
        self.spin_half_delays(time_filter).min()
    }

    pub fn max_spin_ete_delay(&self, time_filter: f64) -> Option<u32> {
        self.spin_half_delays(time_filter).max()
    }

    // ----- TCP DART -----

    pub fn raw_tcp_dart_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.events
            .events(EventKind::TcpDartDelay)
            .iter()
            .filter_map(|ev| ev.delay_measurement())
            .map(|(full, _)| f64::from(full))
    }

    pub fn avg_tcp_dart_delay(&self) -> Option<f64> {
        mean(self.raw_tcp_dart_values())
    }

    pub fn min_tcp_dart_delay(&self) -> Option<u32> {
        self.tcp_dart_delays().min()
    }

    pub fn max_tcp_dart_delay(&self) -> Option<u32> {
        self.tcp_dart_delays().max()
    }

    fn tcp_dart_delays(&self) -> impl Iterator<Item = u32> + '_ {
        self.events
            .events(EventKind::TcpDartDelay)
            .iter()
            .filter_map(|ev| ev.delay_measurement())
            .map(|(full, _)| full)
    }

    // ----- absolute loss -----

    pub fn absolute_q_bit_loss(&self) -> u32 {
        sum_loss(self.events.events(EventKind::QLoss))
    }

    /// Every Q loss measurement accounts for one full block of packets.
    pub fn absolute_q_bit_packet_count(&self) -> u32 {
        self.events.events(EventKind::QLoss).len() as u32 * EFM_Q_BLOCK_SIZE
    }

    pub fn absolute_r_bit_loss(&self) -> u32 {
        sum_loss(self.events.events(EventKind::RLoss))
    }

    pub fn absolute_l_bit_loss(&self) -> u32 {
        self.events.events(EventKind::LSet).len() as u32
    }

    pub fn absolute_t_bit_full_loss(&self) -> u32 {
        sum_loss(self.events.events(EventKind::TFullLoss))
    }

    pub fn absolute_t_bit_half_loss(&self) -> u32 {
        sum_loss(self.events.events(EventKind::THalfLoss))
    }

    pub fn absolute_seq_loss(&self) -> u32 {
        self.final_seq_loss().0
    }

    pub fn absolute_ack_seq_loss(&self) -> u32 {
        self.final_ack_seq_loss().0
    }

    pub fn absolute_tcp_reordering(&self) -> u32 {
        sum_loss(self.events.events(EventKind::TcpReordering))
    }

    // ----- relative loss -----

    pub fn relative_q_bit_loss(&self) -> f64 {
        let events = self.events.events(EventKind::QLoss);
        ratio(
            sum_loss(events),
            events.len() as u32 * EFM_Q_BLOCK_SIZE,
        )
    }

    /// R blocks have the same size as Q blocks.
    pub fn relative_r_bit_loss(&self) -> f64 {
        let events = self.events.events(EventKind::RLoss);
        ratio(
            sum_loss(events),
            events.len() as u32 * EFM_Q_BLOCK_SIZE,
        )
    }

    /// L-bit loss relative to the highest packet count any L event carried.
    pub fn relative_l_bit_loss(&self) -> f64 {
        let events = self.events.events(EventKind::LSet);
        let total_packets = events
            .iter()
            .filter_map(|ev| ev.bit_set_pkt_count())
            .max()
            .unwrap_or(0);
        ratio(events.len() as u32, total_packets)
    }

    pub fn relative_t_bit_full_loss(&self) -> f64 {
        let events = self.events.events(EventKind::TFullLoss);
        ratio(sum_loss(events), sum_pkt_count(events))
    }

    pub fn relative_t_bit_half_loss(&self) -> f64 {
        let events = self.events.events(EventKind::THalfLoss);
        ratio(sum_loss(events), sum_pkt_count(events))
    }

    pub fn relative_seq_loss(&self) -> f64 {
        let (loss, pkt_count) = self.final_seq_loss();
        ratio(loss, loss + pkt_count)
    }

    pub fn relative_ack_seq_loss(&self) -> f64 {
        let (loss, pkt_count) = self.final_ack_seq_loss();
        ratio(loss, loss + pkt_count)
    }

    pub fn relative_tcp_reordering(&self) -> f64 {
        let events = self.events.events(EventKind::TcpReordering);
        let final_pkt_count = events
            .last()
            .and_then(|ev| ev.loss_measurement())
            .map(|(pkt_count, _)| pkt_count)
            .unwrap_or(0);
        ratio(sum_loss(events), final_pkt_count)
    }

    /// Final (loss, pkt_count) snapshot of the cumulative seq-loss counter.
    pub fn final_seq_loss(&self) -> (u32, u32) {
        final_loss_snapshot(self.events.last(EventKind::SeqLoss))
    }

    /// Final (loss, pkt_count) snapshot of the cumulative ack-seq-loss counter.
    pub fn final_ack_seq_loss(&self) -> (u32, u32) {
        final_loss_snapshot(self.events.last(EventKind::AckSeqLoss))
    }
}

/// One directed flow recorded at its client or server host.
#[derive(Debug, Clone)]
pub struct HostFlow {
    flow_id: FlowId,
    events: EventStore,
}

impl HostFlow {
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            events: EventStore::new(),
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.add(event);
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub(crate) fn sort_events(&mut self) {
        self.events.sort();
    }

    pub fn total_l_bits_sent(&self) -> u32 {
        self.events.events(EventKind::HostLSet).len() as u32
    }

    pub fn avg_gt_trans_delay(&self) -> Option<f64> {
        mean(self.gt_delays(EventKind::HostGtTransDelay).map(f64::from))
    }

    pub fn min_gt_trans_delay(&self) -> Option<u32> {
        self.gt_delays(EventKind::HostGtTransDelay).min()
    }

    pub fn max_gt_trans_delay(&self) -> Option<u32> {
        self.gt_delays(EventKind::HostGtTransDelay).max()
    }

    pub fn avg_gt_app_delay(&self) -> Option<f64> {
        mean(self.gt_delays(EventKind::HostGtAppDelay).map(f64::from))
    }

    pub fn min_gt_app_delay(&self) -> Option<u32> {
        self.gt_delays(EventKind::HostGtAppDelay).min()
    }

    pub fn max_gt_app_delay(&self) -> Option<u32> {
        self.gt_delays(EventKind::HostGtAppDelay).max()
    }

    fn gt_delays(&self, kind: EventKind) -> impl Iterator<Item = u32> + '_ {
        self.events
            .events(kind)
            .iter()
            .filter_map(|ev| ev.delay_measurement())
            .map(|(full, _)| full)
    }
}

fn sum_loss(events: &[Event]) -> u32 {
    events
        .iter()
        .filter_map(|ev| ev.loss_measurement())
        .map(|(_, loss)| loss)
        .sum()
}

fn sum_pkt_count(events: &[Event]) -> u32 {
    events
        .iter()
        .filter_map(|ev| ev.loss_measurement())
        .map(|(pkt_count, _)| pkt_count)
        .sum()
}

fn final_loss_snapshot(event: Option<&Event>) -> (u32, u32) {
    event
        .and_then(|ev| ev.loss_measurement())
        .map(|(pkt_count, loss)| (loss, pkt_count))
        .unwrap_or((0, 0))
}

/// Division with the pipeline's convention that an empty denominator means a
/// zero measurement.
pub(crate) fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        f64::from(numerator) / f64::from(denominator)
    }
}

pub(crate) fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0u32;
    for v in values {
        sum += v;
        count += 1;
    }
    (count > 0).then(|| sum / f64::from(count))
}
