//! Active-measurement series between an observer-colocated ping endpoint and
//! a target node.

use crate::errors::SimDataError;
use crate::events::{Event, EventKind, EventStore};
use crate::flow::mean;
use crate::types::NodeId;

/// Whether this series belongs to the pinging client (round-trip numbers) or
/// the pinged server (end-to-end numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PingPairKind {
    Client,
    Server,
}

/// A client↔target or server↔source active-measurement series.
#[derive(Debug, Clone)]
pub struct PingPair {
    kind: PingPairKind,
    target_node_id: NodeId,
    events: EventStore,
}

impl PingPair {
    pub fn new(kind: PingPairKind, target_node_id: NodeId) -> Self {
        Self {
            kind,
            target_node_id,
            events: EventStore::new(),
        }
    }

    pub fn kind(&self) -> PingPairKind {
        self.kind
    }

    pub fn target_node_id(&self) -> NodeId {
        self.target_node_id
    }

    pub fn add_event(&mut self, event: Event) -> Result<(), SimDataError> {
        let ok = match self.kind {
            PingPairKind::Client => event.is_ping_client_event(),
            PingPairKind::Server => event.is_ping_server_event(),
        };
        if !ok {
            return Err(SimDataError::MismatchedPingEvent(event.kind));
        }
        self.events.add(event);
        Ok(())
    }

    pub fn event_count(&self) -> usize {
        self.events.count()
    }

    pub(crate) fn sort_events(&mut self) {
        self.events.sort();
    }

    fn loss_kind(&self) -> EventKind {
        match self.kind {
            PingPairKind::Client => EventKind::PingRtLoss,
            PingPairKind::Server => EventKind::PingEteLoss,
        }
    }

    fn delay_kind(&self) -> EventKind {
        match self.kind {
            PingPairKind::Client => EventKind::PingRtDelay,
            PingPairKind::Server => EventKind::PingEteDelay,
        }
    }

    /// Loss counter of the final event.
    pub fn absolute_loss(&self) -> u32 {
        self.events
            .last(self.loss_kind())
            .and_then(|ev| ev.loss_measurement())
            .map(|(_, loss)| loss)
            .unwrap_or(0)
    }

    /// Relative loss from the final event: `loss / (pkt_count + loss)`.
    pub fn relative_loss(&self) -> f64 {
        match self
            .events
            .last(self.loss_kind())
            .and_then(|ev| ev.loss_measurement())
        {
            Some((pkt_count, loss)) => {
                let denom = f64::from(pkt_count) + f64::from(loss);
                if denom == 0.0 {
                    0.0
                } else {
                    f64::from(loss) / denom
                }
            }
            None => 0.0,
        }
    }

    pub fn avg_delay(&self) -> Option<f64> {
        mean(self.raw_delay_values())
    }

    pub fn raw_delay_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.events
            .events(self.delay_kind())
            .iter()
            .filter_map(|ev| ev.delay_measurement())
            .map(|(full, _)| f64::from(full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventData;
    use crate::types::FlowId;

    #[test]
    fn relative_loss_divides_as_floats() {
        let mut pp = PingPair::new(PingPairKind::Client, NodeId::new(9));
        pp.add_event(Event::new(
            EventKind::PingRtLoss,
            1.0,
            FlowId::new(9),
            EventData::LossMeasurement {
                pkt_count: 95,
                loss: 5,
            },
        ))
        .unwrap();
        pp.sort_events();
        assert_eq!(pp.absolute_loss(), 5);
        assert!((pp.relative_loss() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut pp = PingPair::new(PingPairKind::Server, NodeId::new(9));
        let res = pp.add_event(Event::new(
            EventKind::PingRtLoss,
            1.0,
            FlowId::new(9),
            EventData::LossMeasurement {
                pkt_count: 1,
                loss: 0,
            },
        ));
        assert!(matches!(res, Err(SimDataError::MismatchedPingEvent(_))));
    }

    #[test]
    fn no_delay_events_means_no_average() {
        let pp = PingPair::new(PingPairKind::Client, NodeId::new(9));
        assert!(pp.avg_delay().is_none());
    }
}
