//! Strategies deciding which flows each observer actually tracks.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::IteratorRandom;
use rand::rngs::StdRng;

use efmloc_simdata::{FlowId, Link, NodeId, ResultSet};

use crate::classified::{flow_path_pair, FlowSelectionMap, ObserverSet};
use crate::errors::AnalysisError;
use crate::warnings::WarningCounter;

/// The flow selection strategies.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowSelectionStrategy {
    Random,
    Coverage,
    All,
}

/// Numeric parameters of a strategy (currently only `flow_count`).
pub type StrategyParams = BTreeMap<String, f64>;

/// A strategy with its parameters, as configured.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSelection {
    pub strategy: FlowSelectionStrategy,
    pub params: StrategyParams,
}

impl FlowSelection {
    pub fn all() -> Self {
        Self {
            strategy: FlowSelectionStrategy::All,
            params: StrategyParams::new(),
        }
    }

    fn flow_count(&self) -> usize {
        self.params.get("flow_count").copied().unwrap_or(0.0) as usize
    }
}

/// Computes the flow-selection map for one observer set. With `propagate`
/// set (the FIXED_FLOWS variants), a flow chosen anywhere is pushed to every
/// observer on its forward path; propagation may exceed the per-observer
/// flow count.
pub fn select_flows(
    srs: &ResultSet,
    observer_set: &ObserverSet,
    selection: &FlowSelection,
    propagate: bool,
    rng: &mut StdRng,
    warn: &WarningCounter,
) -> Result<FlowSelectionMap, AnalysisError> {
    match selection.strategy {
        FlowSelectionStrategy::All => {
            let mut map = FlowSelectionMap::new();
            for &oid in &observer_set.observers {
                map.insert(oid, srs.observer_flow_ids(oid)?);
            }
            Ok(map)
        }
        FlowSelectionStrategy::Random => {
            select_random(srs, observer_set, selection.flow_count(), propagate, rng, warn)
        }
        FlowSelectionStrategy::Coverage => {
            select_coverage(srs, observer_set, selection.flow_count(), propagate, warn)
        }
    }
}

fn select_random(
    srs: &ResultSet,
    observer_set: &ObserverSet,
    flow_count: usize,
    propagate: bool,
    rng: &mut StdRng,
    warn: &WarningCounter,
) -> Result<FlowSelectionMap, AnalysisError> {
    let mut map = FlowSelectionMap::new();
    for &oid in &observer_set.observers {
        let available = srs.observer_flow_ids(oid)?;
        let already = map.entry(oid).or_default().clone();
        if already.len() >= flow_count {
            continue;
        }
        let picked = available
            .iter()
            .copied()
            .filter(|fid| !already.contains(fid))
            .choose_multiple(rng, flow_count - already.len());

        for fid in picked {
            map.entry(oid).or_default().insert(fid);
            if propagate {
                propagate_flow(srs, fid, &mut map, warn)?;
            }
        }
    }
    Ok(map)
}

fn select_coverage(
    srs: &ResultSet,
    observer_set: &ObserverSet,
    flow_count: usize,
    propagate: bool,
    warn: &WarningCounter,
) -> Result<FlowSelectionMap, AnalysisError> {
    // Forward-path coverage of every flow any observer in the set sees.
    let mut all_flows = BTreeSet::new();
    for &oid in &observer_set.observers {
        all_flows.extend(srs.observer_flow_ids(oid)?);
    }
    let mut flow_coverage: BTreeMap<FlowId, BTreeSet<Link>> = BTreeMap::new();
    for &fid in &all_flows {
        let Some((_, fp, _, _)) = flow_path_pair(srs, fid, warn)? else {
            continue;
        };
        flow_coverage.insert(fid, fp.links.iter().copied().collect());
    }

    let all_links: BTreeSet<Link> = srs.all_links().into_iter().collect();

    let mut map = FlowSelectionMap::new();
    let mut uncovered_map: BTreeMap<NodeId, BTreeSet<Link>> = BTreeMap::new();

    for &oid in &observer_set.observers {
        let observer_flows = srs.observer_flow_ids(oid)?;
        let mut selected = map.get(&oid).cloned().unwrap_or_default();
        let mut uncovered = if propagate {
            uncovered_map
                .get(&oid)
                .cloned()
                .unwrap_or_else(|| all_links.clone())
        } else {
            all_links.clone()
        };

        if selected.len() >= flow_count || uncovered.is_empty() {
            continue;
        }

        for _ in 0..flow_count - selected.len() {
            let choice = pick_coverage_flow(&flow_coverage, &observer_flows, &selected, &uncovered);
            let Some(fid) = choice else {
                break;
            };
            selected.insert(fid);
            if let Some(covered) = flow_coverage.get(&fid) {
                for link in covered {
                    uncovered.remove(link);
                }
            }
            if propagate {
                let reached = propagate_flow(srs, fid, &mut map, warn)?;
                for observer_id in reached {
                    let other_uncovered = uncovered_map
                        .entry(observer_id)
                        .or_insert_with(|| all_links.clone());
                    if let Some(covered) = flow_coverage.get(&fid) {
                        for link in covered {
                            other_uncovered.remove(link);
                        }
                    }
                }
            }
        }
        map.insert(oid, selected.clone());
        uncovered_map.insert(oid, uncovered);
    }
    Ok(map)
}

/// Greedy choice: the flow adding the most new coverage, ties broken by the
/// smaller flow id. Once nothing adds coverage, the longest remaining flow
/// (ties again to the smaller id).
fn pick_coverage_flow(
    flow_coverage: &BTreeMap<FlowId, BTreeSet<Link>>,
    observer_flows: &BTreeSet<FlowId>,
    selected: &BTreeSet<FlowId>,
    uncovered: &BTreeSet<Link>,
) -> Option<FlowId> {
    let mut best_cover: Option<(usize, FlowId)> = None;
    let mut longest: Option<(usize, FlowId)> = None;

    for (&fid, covered) in flow_coverage {
        if selected.contains(&fid) || !observer_flows.contains(&fid) {
            continue;
        }
        let new_coverage = covered.intersection(uncovered).count();
        if new_coverage > 0 {
            let better = match best_cover {
                None => true,
                Some((best, _)) => new_coverage > best,
            };
            if better {
                best_cover = Some((new_coverage, fid));
            }
        }
        let longer = match longest {
            None => true,
            Some((len, _)) => covered.len() > len,
        };
        if longer {
            longest = Some((covered.len(), fid));
        }
    }

    best_cover.or(longest).map(|(_, fid)| fid)
}

/// Pushes a selected flow to every observer on its forward path and returns
/// the observers it reached.
fn propagate_flow(
    srs: &ResultSet,
    fid: FlowId,
    map: &mut FlowSelectionMap,
    warn: &WarningCounter,
) -> Result<Vec<NodeId>, AnalysisError> {
    let Some((fp_nodes, _, _, _)) = flow_path_pair(srs, fid, warn)? else {
        return Ok(Vec::new());
    };
    for &observer_id in &fp_nodes {
        map.entry(observer_id).or_default().insert(fid);
    }
    Ok(fp_nodes)
}
