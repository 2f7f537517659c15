//! Link-characteristic sets: the same coverage walk as the classified path
//! set, expressed as (connectivity matrix, measurement vector) pairs for the
//! linear solvers.

use std::collections::BTreeMap;

use efmloc_simdata::{FlowId, Link, NodeId, ObserverFlow, ResultSet};

use crate::bits::{EfmBit, EfmBitSet};
use crate::classified::{flow_path_pair, selected, unidir_bit_path, ClassifyOptions};
use crate::errors::AnalysisError;
use crate::linkpath::LinkPath;
use crate::warnings::WarningCounter;

/// One 0/1 row of a connectivity matrix.
pub type ConnectivityRow = Vec<u8>;
/// Rows index measurements, columns index links in the fixed link order.
pub type ConnectivityMatrix = Vec<ConnectivityRow>;
/// The right-hand side aligned to the connectivity matrix.
pub type MeasurementVector = Vec<f64>;

/// Fixed numbering of the chosen link universe, with the reverse mapping used
/// for result attribution.
#[derive(Debug, Clone, Default)]
pub struct LinkIndex {
    forward: BTreeMap<Link, usize>,
    reverse: Vec<Link>,
}

impl LinkIndex {
    pub fn from_links(links: &[Link]) -> Result<Self, AnalysisError> {
        let mut forward = BTreeMap::new();
        for (i, &link) in links.iter().enumerate() {
            if forward.insert(link, i).is_some() {
                return Err(AnalysisError::DuplicateLink(link));
            }
        }
        Ok(Self {
            forward,
            reverse: links.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    pub fn index_of(&self, link: Link) -> Option<usize> {
        self.forward.get(&link).copied()
    }

    pub fn link_at(&self, index: usize) -> Option<Link> {
        self.reverse.get(index).copied()
    }

    /// The 0/1 indicator row of the links a path covers. Links outside the
    /// universe (edge links against a core-only index) contribute nothing.
    pub fn row_for(&self, path: &LinkPath) -> ConnectivityRow {
        let mut row = vec![0u8; self.len()];
        for &link in &path.links {
            if let Some(i) = self.index_of(link) {
                row[i] = 1;
            }
        }
        row
    }
}

type ObserverBitMatrices = BTreeMap<NodeId, BTreeMap<EfmBit, (ConnectivityMatrix, MeasurementVector)>>;

/// Per (observer, bit) connectivity matrices and measurement vectors over a
/// fixed link universe.
#[derive(Debug, Clone, Default)]
pub struct LinkCharacteristicSet {
    index: LinkIndex,
    matrices: ObserverBitMatrices,
}

impl LinkCharacteristicSet {
    /// Characterizes every flow the requested observers recorded, over the
    /// core links or the whole topology. PERFECT mode carries no raw
    /// measurements, so the result is empty there.
    pub fn characterize_all(
        srs: &ResultSet,
        core_links_only: bool,
        opts: ClassifyOptions<'_>,
        warn: &WarningCounter,
    ) -> Result<Self, AnalysisError> {
        if opts.mode == crate::classified::ClassificationMode::Perfect {
            return Ok(Self::default());
        }
        let links = if core_links_only {
            srs.core_links().to_vec()
        } else {
            srs.all_links()
        };
        let index = LinkIndex::from_links(&links)?;

        let mut flow_ids = std::collections::BTreeSet::new();
        for &oid in opts.observer_ids {
            flow_ids.extend(srs.observer_flow_ids(oid)?);
        }
        if opts.observer_ids.is_empty() || flow_ids.is_empty() || opts.bits.is_empty()
            || index.is_empty()
        {
            return Err(AnalysisError::EmptyInput("link characterization"));
        }

        let mut set = Self {
            index,
            matrices: ObserverBitMatrices::new(),
        };
        let mut negative_corrections = 0u64;

        for &fid in &flow_ids {
            let Some((fp_nodes, fp, rev_fid, rp)) = flow_path_pair(srs, fid, warn)? else {
                continue;
            };

            for &observer_id in &fp_nodes {
                if !opts.observer_ids.contains(&observer_id)
                    || !selected(opts.flow_selection, observer_id, fid)
                {
                    continue;
                }
                let vp = srs.observer_or_err(observer_id)?;
                let bidirectional = rp.contains_node(observer_id);

                for &bit in opts.bits {
                    if bit.is_active() {
                        continue;
                    }

                    let path = unidir_bit_path(observer_id, bit, &fp, &rp);
                    let flow = vp.flow_or_err(fid)?;
                    let mut measurement = extract_flow_measurement(flow, bit, opts.time_filter);

                    if measurement > 0.0 {
                        set.push_row(observer_id, bit, &path, measurement);
                    } else if bit.is_loss() {
                        if measurement < 0.0 {
                            measurement = 0.0;
                            negative_corrections += 1;
                            warn.note_negative_measurement();
                        }
                        set.push_row(observer_id, bit, &path, measurement);
                    }
                    // Delay bits with non-positive samples are dropped.

                    if bidirectional {
                        set.push_bidir_rows(vp, bit, fid, rev_fid, &fp, &rp, opts.time_filter)?;
                    }
                }
            }
        }

        if negative_corrections > 0 {
            log::warn!(
                "corrected {negative_corrections} negative unidirectional measurements to 0"
            );
        }

        set.push_active_rows(srs, &opts, warn)?;
        Ok(set)
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

    /// Additional rows for measurements only a bidirectional observer can
    /// decompose; each row covers the same path as its classified-set
    /// counterpart.
    fn push_bidir_rows(
        &mut self,
        vp: &efmloc_simdata::ObserverVantagePoint,
        bit: EfmBit,
        fid: FlowId,
        rev_fid: FlowId,
        fp: &LinkPath,
        rp: &LinkPath,
        time_filter: f64,
    ) -> Result<(), AnalysisError> {
        let observer_id = vp.node_id();
        let flow = vp.flow_or_err(fid)?;
        let reverse_flow = vp.flow_or_err(rev_fid)?;
        let half_rt_path = rp
            .from_node_to_end(observer_id)
            .append(&fp.up_to(observer_id));

        match bit {
            EfmBit::T => {
                self.push_row(observer_id, bit, &half_rt_path, flow.relative_t_bit_half_loss());
            }
            EfmBit::Spin => {
                let delay = flow.avg_spin_ete_delay(time_filter).unwrap_or(0.0);
                if delay > 0.0 {
                    self.push_row(observer_id, bit, &half_rt_path, delay);
                }
            }
            EfmBit::Qr => {
                let uloss = flow.relative_q_bit_loss();
                let uloss_rev = reverse_flow.relative_q_bit_loss();
                let tqloss_rev = reverse_flow.relative_r_bit_loss();
                let dsl =
                    (((tqloss_rev - uloss_rev) / (1.0 - uloss_rev)) - uloss) / (1.0 - uloss);
                let downstream = fp.from_node_to_end(observer_id);
                self.push_row(observer_id, bit, &downstream, dsl.max(0.0));

                let half_loss = (flow.relative_r_bit_loss() - uloss_rev) / (1.0 - uloss_rev);
                self.push_row(observer_id, bit, &half_rt_path, half_loss.max(0.0));
            }
            EfmBit::Qt => {
                let uloss_rev = reverse_flow.relative_q_bit_loss();
                let loss =
                    (reverse_flow.relative_t_bit_half_loss() - uloss_rev) / (1.0 - uloss_rev);
                let path = fp.from_node_to_end(observer_id).append(rp);
                self.push_row(observer_id, bit, &path, loss.max(0.0));
            }
            _ => {}
        }
        Ok(())
    }

    /// Rows for the active ping measurements. Negative values are logged and
    /// passed through; a ping pair without delay samples contributes no
    /// delay row.
    fn push_active_rows(
        &mut self,
        srs: &ResultSet,
        opts: &ClassifyOptions<'_>,
        warn: &WarningCounter,
    ) -> Result<(), AnalysisError> {
        let active_bits: Vec<EfmBit> =
            opts.bits.iter().copied().filter(|b| b.is_active()).collect();
        if active_bits.is_empty() {
            return Ok(());
        }

        for &oid in opts.observer_ids {
            let vp = srs.observer_or_err(oid)?;

            for (target, pp) in vp.client_ping_pairs() {
                let out = LinkPath::from_nodes(srs.ping_path(oid, target)?);
                let back = LinkPath::from_nodes(srs.ping_path(target, oid)?);
                let (Some(out), Some(back)) = (out, back) else {
                    warn.note_short_flow_path();
                    continue;
                };
                let rt_path = out.append(&back);
                for &bit in &active_bits {
                    self.push_ping_row(oid, bit, &rt_path, pp, warn);
                }
            }

            for (target, pp) in vp.server_ping_pairs() {
                let Some(ete_path) = LinkPath::from_nodes(srs.ping_path(target, oid)?) else {
                    warn.note_short_flow_path();
                    continue;
                };
                for &bit in &active_bits {
                    self.push_ping_row(oid, bit, &ete_path, pp, warn);
                }
            }
        }
        Ok(())
    }

    fn push_ping_row(
        &mut self,
        oid: NodeId,
        bit: EfmBit,
        path: &LinkPath,
        pp: &efmloc_simdata::PingPair,
        warn: &WarningCounter,
    ) {
        match bit {
            EfmBit::Pinglss => {
                let loss = pp.relative_loss();
                if loss < 0.0 {
                    warn.note_negative_ping_value();
                }
                self.push_row(oid, bit, path, loss);
            }
            EfmBit::Pingdly => {
                if let Some(delay) = pp.avg_delay() {
                    if delay < 0.0 {
                        warn.note_negative_ping_value();
                    }
                    self.push_row(oid, bit, path, delay);
                }
            }
            _ => unreachable!("only active bits reach the ping rows"),
        }
    }

    pub fn link_index(&self) -> &LinkIndex {
        &self.index
    }

    /// The matrix/vector pair of one (observer, bit), if it was built.
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

    /// Concatenated matrix and vector over the given observers and bits, in
    /// observer then bit order.
    pub fn gather(
        &self,
        observers: &std::collections::BTreeSet<NodeId>,
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

/// The raw measurement value of one flow for one bit. Negative derived
/// losses are clamped by the caller where required; `QL`/`QR` clamp here the
/// way the classified set never does, because a matrix row needs a usable
/// number.
fn extract_flow_measurement(flow: &ObserverFlow, bit: EfmBit, time_filter: f64) -> f64 {
    match bit {
        EfmBit::Seq => flow.relative_seq_loss(),
        EfmBit::Q => flow.relative_q_bit_loss(),
        EfmBit::L => flow.relative_l_bit_loss(),
        EfmBit::T => flow.relative_t_bit_full_loss(),
        EfmBit::R => flow.relative_r_bit_loss(),
        EfmBit::Spin => flow.avg_spin_rt_delay(time_filter).unwrap_or(0.0),
        EfmBit::Ql => {
            let uloss = flow.relative_q_bit_loss();
            ((flow.relative_l_bit_loss() - uloss) / (1.0 - uloss)).max(0.0)
        }
        EfmBit::Qr => {
            let uloss = flow.relative_q_bit_loss();
            ((flow.relative_r_bit_loss() - uloss) / (1.0 - uloss)).max(0.0)
        }
        EfmBit::Qt => {
            let uloss = flow.relative_q_bit_loss();
            (flow.relative_t_bit_full_loss() - uloss) / (1.0 - uloss)
        }
        EfmBit::Lt => {
            let eloss = flow.relative_l_bit_loss();
            (flow.relative_t_bit_full_loss() - eloss) / (1.0 - eloss)
        }
        EfmBit::Tcpro => flow.relative_tcp_reordering(),
        EfmBit::Tcpdart => flow.avg_tcp_dart_delay().unwrap_or(0.0),
        EfmBit::Pingdly | EfmBit::Pinglss => {
            unreachable!("active bits are measured from ping pairs")
        }
    }
}
