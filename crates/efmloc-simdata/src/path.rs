//! Aggregates for multi-endpoint logical paths (the L and SQ bit carriers).

use crate::errors::SimDataError;
use crate::events::{Event, EventKind, EventStore};
use crate::flow::ratio;
use crate::types::PathId;

/// Measurement series of one observer path.
#[derive(Debug, Clone)]
pub struct PathMeasurements {
    path_id: PathId,
    events: EventStore,
}

impl PathMeasurements {
    pub fn new(path_id: PathId) -> Self {
        Self {
            path_id,
            events: EventStore::new(),
        }
    }

    pub fn path_id(&self) -> PathId {
        self.path_id
    }

    pub fn add_event(&mut self, event: Event) -> Result<(), SimDataError> {
        if !event.is_path_event() {
            return Err(SimDataError::NotAPathEvent(event.kind));
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

    /// Packet count reported by the final SQ loss snapshot.
    pub fn sq_packet_count(&self) -> u32 {
        self.events
            .last(EventKind::PathSqLoss)
            .and_then(|ev| ev.signed_loss_measurement())
            .map(|(pkt_count, _)| pkt_count)
            .unwrap_or(0)
    }

    pub fn absolute_l_bit_loss(&self) -> u32 {
        self.events.events(EventKind::PathLSet).len() as u32
    }

    /// SQ loss is a cumulative signed counter; the final event is the result.
    pub fn absolute_final_sq_bits_loss(&self) -> i32 {
        self.events
            .last(EventKind::PathSqLoss)
            .and_then(|ev| ev.signed_loss_measurement())
            .map(|(_, loss)| loss)
            .unwrap_or(0)
    }

    pub fn absolute_avg_sq_bits_loss(&self) -> f64 {
        let events = self.events.events(EventKind::PathSqLoss);
        if events.is_empty() {
            return 0.0;
        }
        let sum: f64 = events
            .iter()
            .filter_map(|ev| ev.signed_loss_measurement())
            .map(|(_, loss)| f64::from(loss))
            .sum();
        sum / events.len() as f64
    }

    pub fn relative_l_bit_loss(&self) -> f64 {
        let events = self.events.events(EventKind::PathLSet);
        let total_packets = events
            .iter()
            .filter_map(|ev| ev.bit_set_pkt_count())
            .max()
            .unwrap_or(0);
        ratio(events.len() as u32, total_packets)
    }

    pub fn relative_final_sq_bits_loss(&self) -> f64 {
        match self
            .events
            .last(EventKind::PathSqLoss)
            .and_then(|ev| ev.signed_loss_measurement())
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

    pub fn relative_avg_sq_bits_loss(&self) -> f64 {
        let samples: Vec<f64> = self
            .events
            .events(EventKind::PathSqLoss)
            .iter()
            .filter_map(|ev| ev.signed_loss_measurement())
            .map(|(pkt_count, loss)| {
                let denom = f64::from(pkt_count) + f64::from(loss);
                if denom == 0.0 {
                    0.0
                } else {
                    f64::from(loss) / denom
                }
            })
            .collect();
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventData;
    use crate::types::FlowId;

    fn sq_loss(time: f64, pkt_count: u32, loss: i32) -> Event {
        Event::new(
            EventKind::PathSqLoss,
            time,
            FlowId::new(3),
            EventData::SignedLossMeasurement { pkt_count, loss },
        )
    }

    #[test]
    fn final_and_avg_sq_loss_differ() {
        let mut path = PathMeasurements::new(PathId::new(3));
        path.add_event(sq_loss(1.0, 90, 10)).unwrap();
        path.add_event(sq_loss(2.0, 60, 40)).unwrap();
        path.sort_events();

        assert_eq!(path.absolute_final_sq_bits_loss(), 40);
        assert!((path.absolute_avg_sq_bits_loss() - 25.0).abs() < 1e-12);
        assert!((path.relative_final_sq_bits_loss() - 0.4).abs() < 1e-12);
        assert!((path.relative_avg_sq_bits_loss() - 0.25).abs() < 1e-12);
        assert_eq!(path.sq_packet_count(), 60);
    }

    #[test]
    fn rejects_non_path_events() {
        let mut path = PathMeasurements::new(PathId::new(1));
        let res = path.add_event(Event::new(
            EventKind::QLoss,
            0.0,
            FlowId::new(1),
            EventData::LossMeasurement {
                pkt_count: 64,
                loss: 0,
            },
        ));
        assert!(matches!(res, Err(SimDataError::NotAPathEvent(_))));
    }
}
