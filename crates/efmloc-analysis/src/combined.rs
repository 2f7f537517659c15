//! Differential "combined flow" characterization: adjacent observers on a
//! flow path see nested coverage, and the difference of their measurements
//! characterizes the links in between.

use std::collections::{BTreeMap, BTreeSet};

use efmloc_simdata::{FlowId, NodeId, ResultSet};

use crate::bits::{EfmBit, EfmBitSet};
use crate::classified::{flow_path_pair, selected, ClassificationMode, ClassifyOptions};
use crate::errors::AnalysisError;
use crate::linkchar::{ConnectivityMatrix, LinkIndex, MeasurementVector};
use crate::linkpath::LinkPath;
use crate::warnings::WarningCounter;

type ObserverBitMatrices = BTreeMap<NodeId, BTreeMap<EfmBit, (ConnectivityMatrix, MeasurementVector)>>;

/// Per (observer, bit) difference rows over the core-link universe.
#[derive(Debug, Clone, Default)]
pub struct CombinedFlowSet {
    index: LinkIndex,
    matrices: ObserverBitMatrices,
}

impl CombinedFlowSet {
    /// Builds the difference rows for every eligible flow. Skipped (empty
    /// result) under PERFECT classification.
    pub fn characterize_all(
        srs: &ResultSet,
        opts: ClassifyOptions<'_>,
        warn: &WarningCounter,
    ) -> Result<Self, AnalysisError> {
        if opts.mode == ClassificationMode::Perfect {
            return Ok(Self::default());
        }
        let index = LinkIndex::from_links(srs.core_links())?;

        let mut flow_ids = BTreeSet::new();
        for &oid in opts.observer_ids {
            flow_ids.extend(srs.observer_flow_ids(oid)?);
        }
        if opts.observer_ids.is_empty() || flow_ids.is_empty() || opts.bits.is_empty()
            || index.is_empty()
        {
            return Err(AnalysisError::EmptyInput("combined-flow characterization"));
        }

        let mut set = Self {
            index,
            matrices: ObserverBitMatrices::new(),
        };

        for &fid in &flow_ids {
            let Some((fp_nodes, fp, rev_fid, rp)) = flow_path_pair(srs, fid, warn)? else {
                continue;
            };

            for &bit in opts.bits {
                if !bit.supports_flow_combination() {
                    continue;
                }
                match bit {
                    EfmBit::Q => {
                        set.combine_q_bit(srs, &opts, fid, &fp_nodes, &fp, &rp, warn)?
                    }
                    EfmBit::Spin | EfmBit::Tcpdart => set.combine_delay_bit(
                        srs, &opts, bit, fid, rev_fid, &fp_nodes, &fp, &rp, warn,
                    )?,
                    _ => unreachable!("flow combination supports Q, SPIN, TCPDART"),
                }
            }
        }

        Ok(set)
    }

    /// Q-bit combination: absolute upstream loss counters of adjacent
    /// observers are differenced and normalized by the packets that reached
    /// the longer observer's coverage.
    fn combine_q_bit(
        &mut self,
        srs: &ResultSet,
        opts: &ClassifyOptions<'_>,
        fid: FlowId,
        fp_nodes: &[NodeId],
        fp: &LinkPath,
        _rp: &LinkPath,
        warn: &WarningCounter,
    ) -> Result<(), AnalysisError> {
        // Coverage of the Q bit grows along the flow direction, so the
        // traversal collects paths in ascending length.
        let mut collected: Vec<(NodeId, LinkPath, (u32, u32))> = Vec::new();
        for &observer_id in fp_nodes {
            if !opts.observer_ids.contains(&observer_id)
                || !selected(opts.flow_selection, observer_id, fid)
            {
                continue;
            }
            let flow = srs.observer_or_err(observer_id)?.flow_or_err(fid)?;
            let loss = flow.absolute_q_bit_loss();
            let pkts = flow.absolute_q_bit_packet_count();
            if pkts > 0 {
                collected.push((observer_id, fp.up_to(observer_id), (loss, pkts)));
            }
        }
        if collected.len() < 2 {
            return Ok(());
        }

        for idx in (1..collected.len()).rev() {
            let (observer_id, ref longer, (loss_long, pkts_long)) = collected[idx];
            let (_, ref shorter, (loss_short, _pkts_short)) = collected[idx - 1];

            // A later observer reporting more packets, or more loss than
            // packets, points at inconsistent counters.
            if pkts_long > collected[idx - 1].2 .1 || loss_long > pkts_long {
                warn.note_dropped_combined_row();
                continue;
            }
            if loss_long < loss_short {
                warn.note_dropped_combined_row();
                continue;
            }
            let Some(difference) = link_path_difference(longer, shorter) else {
                warn.note_dropped_combined_row();
                continue;
            };

            let loss_difference = loss_long - loss_short;
            let denom = f64::from(pkts_long) - f64::from(loss_short);
            let relative = if denom == 0.0 {
                0.0
            } else {
                f64::from(loss_difference) / denom
            };
            self.push_row(observer_id, EfmBit::Q, &difference, relative);
        }
        Ok(())
    }

    /// SPIN / TCP DART combination: direct measurement differences of
    /// bidirectionally observing adjacent observers.
    #[allow(clippy::too_many_arguments)]
    fn combine_delay_bit(
        &mut self,
        srs: &ResultSet,
        opts: &ClassifyOptions<'_>,
        bit: EfmBit,
        fid: FlowId,
        _rev_fid: FlowId,
        fp_nodes: &[NodeId],
        fp: &LinkPath,
        rp: &LinkPath,
        warn: &WarningCounter,
    ) -> Result<(), AnalysisError> {
        let mut collected: Vec<(NodeId, LinkPath, f64)> = Vec::new();
        for &observer_id in fp_nodes {
            if !opts.observer_ids.contains(&observer_id)
                || !selected(opts.flow_selection, observer_id, fid)
                || !rp.contains_node(observer_id)
            {
                continue;
            }
            let flow = srs.observer_or_err(observer_id)?.flow_or_err(fid)?;
            let measurement = match bit {
                EfmBit::Spin => flow.avg_spin_ete_delay(opts.time_filter).unwrap_or(0.0),
                EfmBit::Tcpdart => flow.avg_tcp_dart_delay().unwrap_or(0.0),
                _ => unreachable!("delay combination supports SPIN and TCPDART"),
            };
            if measurement > 0.0 {
                let path = combination_coverage(observer_id, bit, fp, rp);
                collected.push((observer_id, path, measurement));
            }
        }
        if collected.len() < 2 {
            return Ok(());
        }
        // TCP DART coverage shrinks along the flow direction; flip the list
        // so adjacent pairs are (longer, shorter) here too.
        if bit == EfmBit::Tcpdart {
            collected.reverse();
        }

        for idx in (1..collected.len()).rev() {
            let (observer_id, ref longer, current) = collected[idx];
            let (_, ref shorter, next) = collected[idx - 1];

            let Some(difference) = link_path_difference(longer, shorter) else {
                warn.note_dropped_combined_row();
                continue;
            };
            let measurement_difference = current - next;
            if measurement_difference < 0.0 {
                warn.note_dropped_combined_row();
                continue;
            }
            self.push_row(observer_id, bit, &difference, measurement_difference);
        }
        Ok(())
    }

    fn push_row(&mut self, observer: NodeId, bit: EfmBit, path: &LinkPath, measurement: f64) {
        let row = self.index.row_for(path);
        let (matrix, vector) = self
            .matrices
            .entry(observer)
            .or_default()
            .entry(bit)
            .or_default();
        matrix.push(row);
        vector.push(measurement);
    }

    pub fn link_index(&self) -> &LinkIndex {
        &self.index
    }

    pub fn matrix_for(
        &self,
        observer: NodeId,
        bit: EfmBit,
    ) -> Option<(&ConnectivityMatrix, &MeasurementVector)> {
        self.matrices
            .get(&observer)
            .and_then(|bits| bits.get(&bit))
            .map(|(m, v)| (m, v))
    }

    pub fn gather(
        &self,
        observers: &BTreeSet<NodeId>,
        bits: &EfmBitSet,
    ) -> (ConnectivityMatrix, MeasurementVector) {
        let mut matrix = ConnectivityMatrix::new();
        let mut vector = MeasurementVector::new();
        for &oid in observers {
            for &bit in bits {
                if let Some((m, v)) = self.matrix_for(oid, bit) {
                    matrix.extend_from_slice(m);
                    vector.extend_from_slice(v);
                }
            }
        }
        (matrix, vector)
    }
}

/// Coverage of one observer's measurement in the differential scheme.
fn combination_coverage(observer: NodeId, bit: EfmBit, fp: &LinkPath, rp: &LinkPath) -> LinkPath {
    match bit {
        EfmBit::Q => fp.up_to(observer),
        EfmBit::Spin => fp
            .up_to(observer)
            .append(&rp.from_node_to_end(observer)),
        EfmBit::Tcpdart => fp
            .from_node_to_end(observer)
            .append(&rp.up_to(observer)),
        _ => unreachable!("flow combination supports Q, SPIN, TCPDART"),
    }
}

/// The links of `longer` not in `shorter`. `None` unless `shorter` is a
/// proper subset of `longer`.
fn link_path_difference(longer: &LinkPath, shorter: &LinkPath) -> Option<LinkPath> {
    if longer.len() <= shorter.len() {
        return None;
    }
    if shorter.links.iter().any(|&l| !longer.contains_link(l)) {
        return None;
    }
    let links = longer
        .links
        .iter()
        .copied()
        .filter(|&l| !shorter.contains_link(l))
        .collect();
    Some(LinkPath::new(links))
}

#[cfg(test)]
mod tests {
    use super::*;
    use efmloc_simdata::{testing, Link};

    fn nodes(ids: &[u32]) -> Vec<NodeId> {
        ids.iter().map(|&n| NodeId::new(n)).collect()
    }

    #[test]
    fn path_difference_requires_nesting() {
        let long = LinkPath::from_nodes(&nodes(&[0, 1, 2, 3])).unwrap();
        let short = LinkPath::from_nodes(&nodes(&[0, 1, 2])).unwrap();
        let diff = link_path_difference(&long, &short).unwrap();
        assert_eq!(
            diff.links,
            vec![Link::new(NodeId::new(2), NodeId::new(3))]
        );

        let other = LinkPath::from_nodes(&nodes(&[7, 8])).unwrap();
        assert!(link_path_difference(&long, &other).is_none());
        assert!(link_path_difference(&short, &long).is_none());
    }

    #[test]
    fn q_bit_differences_are_emitted_per_adjacent_pair() -> anyhow::Result<()> {
        let mut srs = testing::empty_result_set();
        let path = nodes(&[0, 1, 2, 3]);
        testing::register_flow_pair(
            &mut srs,
            FlowId::new(1),
            FlowId::new(2),
            &path,
            testing::tuple(0, 3),
        );
        testing::set_stats_on_path(&mut srs, FlowId::new(1), &path, 1000, 1000);
        testing::set_stats_on_path(&mut srs, FlowId::new(2), &path, 1000, 1000);
        // Upstream loss counters grow along the path: 2 blocks each.
        testing::add_observer_event(&mut srs, NodeId::new(1), testing::q_loss(FlowId::new(1), 2.0, 1));
        testing::add_observer_event(&mut srs, NodeId::new(1), testing::q_loss(FlowId::new(1), 2.1, 0));
        testing::add_observer_event(&mut srs, NodeId::new(2), testing::q_loss(FlowId::new(1), 2.0, 2));
        testing::add_observer_event(&mut srs, NodeId::new(2), testing::q_loss(FlowId::new(1), 2.1, 1));
        for n in [0u32, 1, 2] {
            srs.add_core_link(Link::new(NodeId::new(n), NodeId::new(n + 1)));
            srs.add_core_link(Link::new(NodeId::new(n + 1), NodeId::new(n)));
        }
        srs.finish_import();

        let observers: BTreeSet<NodeId> = [NodeId::new(1), NodeId::new(2)].into_iter().collect();
        let selection: crate::classified::FlowSelectionMap = observers
            .iter()
            .map(|&oid| (oid, srs.observer_flow_ids(oid).unwrap()))
            .collect();
        let bits: EfmBitSet = [EfmBit::Q].into_iter().collect();
        let warn = WarningCounter::new();
        let opts = ClassifyOptions::builder()
            .observer_ids(&observers)
            .flow_selection(&selection)
            .bits(&bits)
            .loss_rate_th(0.05)
            .delay_th_ms(10.0)
            .flow_length_th(0)
            .mode(ClassificationMode::Static)
            .classification_base_id("test")
            .time_filter(f64::MAX)
            .build();

        let cfs = CombinedFlowSet::characterize_all(&srs, opts, &warn)?;
        let (matrix, vector) = cfs.gather(&observers, &bits);
        assert_eq!(matrix.len(), 1);
        // The difference row covers exactly the link between the observers.
        let link_idx = cfs
            .link_index()
            .index_of(Link::new(NodeId::new(1), NodeId::new(2)))
            .unwrap();
        assert_eq!(matrix[0][link_idx], 1);
        assert_eq!(matrix[0].iter().map(|&x| x as u32).sum::<u32>(), 1);
        // (3 - 1) lost packets over (128 - 1) that reached the new coverage.
        assert!((vector[0] - 2.0 / 127.0).abs() < 1e-12);
        Ok(())
    }
}
