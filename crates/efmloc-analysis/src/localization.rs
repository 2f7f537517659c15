//! The localization engine: methods that turn classified paths or
//! matrix/vector characterizations into a set of links believed faulty.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array1;
use rustc_hash::FxHashSet;
use serde::ser::SerializeSeq;

use efmloc_simdata::Link;

use crate::bits::{bit_set_is_loss, EfmBitSet};
use crate::classified::ClassifiedLinkPath;
use crate::errors::AnalysisError;
use crate::linkchar::{ConnectivityMatrix, LinkIndex, MeasurementVector};
use crate::lsqr::{lsqr, SparseBinaryMatrix};
use crate::warnings::WarningCounter;

/// Every localization method the analysis config can request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalizationMethod {
    Possible,
    Probable,
    WeightIter,
    WeightIterLvl,
    WeightDir,
    WeightDirLvl,
    Detection,
    Dlc,
    WeightBad,
    WeightBadLvl,
    LinLsqr,
    LinLsqrFixedFlows,
    LinLsqrCoreOnly,
    LinLsqrCoreOnlyFixedFlows,
    LinLsqrLvl,
    LpWithSlack,
    FlowCombination,
    FlowCombinationFixedFlows,
}

/// The input shape a method consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodInput {
    /// Classified link paths.
    ClassifiedPaths,
    /// A per-observer link-characteristic matrix.
    LinkCharacteristics,
    /// The differential combined-flow matrix.
    CombinedFlows,
}

impl LocalizationMethod {
    pub fn input(self) -> MethodInput {
        use LocalizationMethod::*;
        match self {
            Possible | Probable | WeightIter | WeightIterLvl | WeightDir | WeightDirLvl
            | Detection | Dlc | WeightBad | WeightBadLvl | LpWithSlack => {
                MethodInput::ClassifiedPaths
            }
            LinLsqr | LinLsqrFixedFlows | LinLsqrCoreOnly | LinLsqrCoreOnlyFixedFlows
            | LinLsqrLvl => MethodInput::LinkCharacteristics,
            FlowCombination | FlowCombinationFixedFlows => MethodInput::CombinedFlows,
        }
    }

    /// Methods needing the propagating ("fixed flows") selection pass.
    pub fn requires_fixed_flows(self) -> bool {
        matches!(
            self,
            LocalizationMethod::LinLsqrFixedFlows
                | LocalizationMethod::LinLsqrCoreOnlyFixedFlows
                | LocalizationMethod::FlowCombinationFixedFlows
        )
    }

    /// LSQR variants restricted to the core-link universe.
    pub fn core_links_only(self) -> bool {
        matches!(
            self,
            LocalizationMethod::LinLsqrCoreOnly | LocalizationMethod::LinLsqrCoreOnlyFixedFlows
        )
    }
}

/// Numeric method parameters from the analysis config.
pub type MethodParams = BTreeMap<String, f64>;

pub type LinkSet = BTreeSet<Link>;
pub type LinkRatings = BTreeMap<Link, f64>;

fn serialize_link_ratings<S>(ratings: &LinkRatings, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    #[derive(serde::Serialize)]
    struct Entry {
        link: Link,
        rating: f64,
    }
    let mut seq = serializer.serialize_seq(Some(ratings.len()))?;
    for (&link, &rating) in ratings {
        seq.serialize_element(&Entry { link, rating })?;
    }
    seq.end()
}

/// Outcome of one method run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LocalizationResult {
    #[serde(rename = "failedLinks")]
    pub failed_links: LinkSet,
    pub method: LocalizationMethod,
    pub params: MethodParams,
    #[serde(rename = "efmBits")]
    pub efm_bits: EfmBitSet,
    #[serde(rename = "linkRatings", serialize_with = "serialize_link_ratings")]
    pub link_ratings: LinkRatings,
}

/// Runs a classified-path method. `None` (with a counted warning) when the
/// path set is empty.
pub fn localize_classified(
    paths: &[ClassifiedLinkPath],
    all_links: &[Link],
    efm_bits: &EfmBitSet,
    method: LocalizationMethod,
    params: &MethodParams,
    loss_rate_th: f64,
    delay_th: f64,
    warn: &WarningCounter,
) -> Result<Option<LocalizationResult>, AnalysisError> {
    if paths.is_empty() {
        log::warn!("skipping {method}: no classified paths for this bit set");
        warn.note_skipped_method();
        return Ok(None);
    }

    let mut result = LocalizationResult {
        failed_links: LinkSet::new(),
        method,
        params: params.clone(),
        efm_bits: efm_bits.clone(),
        link_ratings: LinkRatings::new(),
    };

    match method {
        LocalizationMethod::Possible => result.failed_links = possible_failed_links(paths),
        LocalizationMethod::Probable => result.failed_links = probable_failed_links(paths),
        LocalizationMethod::Detection => result.failed_links = detect_failed_links(paths),
        LocalizationMethod::Dlc => {
            let threshold = require(params, method, "dlcthresh")?;
            result.failed_links = direct_link_count(paths, threshold);
        }
        LocalizationMethod::WeightDir | LocalizationMethod::WeightBad => {
            let cfg = WeightConfig::single(params, method)?;
            result.failed_links = threshold_weights(
                &calculate_link_weights(paths, all_links, &cfg)?,
                cfg.wthresh,
            );
        }
        LocalizationMethod::WeightDirLvl | LocalizationMethod::WeightBadLvl => {
            let cfg = WeightConfig::three_level(params, method)?;
            result.failed_links = threshold_weights(
                &calculate_link_weights(paths, all_links, &cfg)?,
                cfg.wthresh,
            );
        }
        LocalizationMethod::WeightIter => {
            let cfg = WeightConfig::single(params, method)?;
            result.failed_links = iterative_weighted_failed_links(paths, all_links, &cfg)?;
        }
        LocalizationMethod::WeightIterLvl => {
            let cfg = WeightConfig::three_level(params, method)?;
            result.failed_links = iterative_weighted_failed_links(paths, all_links, &cfg)?;
        }
        LocalizationMethod::LpWithSlack => {
            let localize_loss = bit_set_is_loss(efm_bits)?;
            match run_lp(paths, all_links, localize_loss, loss_rate_th, delay_th, warn) {
                Ok((failed, ratings)) => {
                    result.failed_links = failed;
                    result.link_ratings = ratings;
                }
                Err(e @ AnalysisError::Solver(_)) => {
                    // Solver trouble invalidates this method, not the run.
                    log::error!("LP_WITH_SLACK failed: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        _ => unreachable!("{method} does not consume classified paths"),
    }

    Ok(Some(result))
}

#[cfg(feature = "lp")]
fn run_lp(
    paths: &[ClassifiedLinkPath],
    all_links: &[Link],
    localize_loss: bool,
    loss_rate_th: f64,
    delay_th: f64,
    warn: &WarningCounter,
) -> Result<(LinkSet, LinkRatings), AnalysisError> {
    crate::lp::lp_with_slack(paths, all_links, localize_loss, loss_rate_th, delay_th, warn)
}

#[cfg(not(feature = "lp"))]
fn run_lp(
    _paths: &[ClassifiedLinkPath],
    _all_links: &[Link],
    _localize_loss: bool,
    _loss_rate_th: f64,
    _delay_th: f64,
    _warn: &WarningCounter,
) -> Result<(LinkSet, LinkRatings), AnalysisError> {
    log::info!("no LP solver built in, LP_WITH_SLACK returns an empty set");
    Ok((LinkSet::new(), LinkRatings::new()))
}

/// Runs a matrix method (the LSQR and flow-combination families). `None`
/// (with a counted warning) when the system is empty.
#[allow(clippy::too_many_arguments)]
pub fn localize_linear(
    matrix: &ConnectivityMatrix,
    vector: &MeasurementVector,
    index: &LinkIndex,
    efm_bits: &EfmBitSet,
    method: LocalizationMethod,
    params: &MethodParams,
    loss_rate_th: f64,
    delay_th: f64,
    warn: &WarningCounter,
) -> Result<Option<LocalizationResult>, AnalysisError> {
    if matrix.is_empty() || vector.is_empty() {
        log::warn!("skipping {method}: no measurement rows for this bit set");
        warn.note_skipped_method();
        return Ok(None);
    }
    let localize_loss = bit_set_is_loss(efm_bits)?;

    // Loss systems are solved in log-survival space. Rows at 100% loss have
    // no finite image and are dropped; negative rates are corrupt input.
    let mut kept_rows = ConnectivityMatrix::new();
    let mut rhs = Vec::new();
    for (row, &value) in matrix.iter().zip(vector) {
        if localize_loss {
            if value < 0.0 {
                return Err(AnalysisError::NegativeLossRate(value));
            }
            if value >= 1.0 {
                log::warn!("dropping measurement row with loss rate {value}");
                warn.note_dropped_solver_row();
                continue;
            }
            kept_rows.push(row.clone());
            rhs.push((1.0 - value).ln());
        } else {
            kept_rows.push(row.clone());
            rhs.push(value);
        }
    }
    if kept_rows.is_empty() {
        warn.note_skipped_method();
        return Ok(None);
    }

    let a = SparseBinaryMatrix::from_dense(&kept_rows, index.len());
    let b = Array1::from(rhs);
    let (x, termination) = lsqr(&a, &b);
    log::debug!("{method}: lsqr finished with {termination:?}");

    let mut failed_links = LinkSet::new();
    let mut link_ratings = LinkRatings::new();
    for (i, &value) in x.iter().enumerate() {
        let Some(link) = index.link_at(i) else {
            continue;
        };
        let rating = if localize_loss { 1.0 - value.exp() } else { value };
        link_ratings.insert(link, rating);
        let threshold = if localize_loss { loss_rate_th } else { delay_th };
        if rating >= threshold {
            failed_links.insert(link);
        }
    }

    Ok(Some(LocalizationResult {
        failed_links,
        method,
        params: params.clone(),
        efm_bits: efm_bits.clone(),
        link_ratings,
    }))
}

// ----- set-based methods -----

/// Iterates in the given order: links of non-failed paths become definitely
/// good; links of failed paths not yet known good accumulate as bad.
fn possible_failed_links(paths: &[ClassifiedLinkPath]) -> LinkSet {
    let mut good = FxHashSet::default();
    let mut bad = LinkSet::new();
    for cp in paths {
        if cp.failed {
            for &link in &cp.path.links {
                if !good.contains(&link) {
                    bad.insert(link);
                }
            }
        } else {
            for &link in &cp.path.links {
                good.insert(link);
                bad.remove(&link);
            }
        }
    }
    bad
}

/// A failed path with exactly one link outside the union of all good paths
/// pins that link as bad.
fn probable_failed_links(paths: &[ClassifiedLinkPath]) -> LinkSet {
    let good: FxHashSet<Link> = paths
        .iter()
        .filter(|cp| !cp.failed)
        .flat_map(|cp| cp.path.links.iter().copied())
        .collect();

    let mut bad = LinkSet::new();
    for cp in paths.iter().filter(|cp| cp.failed) {
        let mut suspects = cp.path.links.iter().filter(|l| !good.contains(l));
        if let (Some(&single), None) = (suspects.next(), suspects.next()) {
            bad.insert(single);
        }
    }
    bad
}

/// Union of the links on any failed path.
fn detect_failed_links(paths: &[ClassifiedLinkPath]) -> LinkSet {
    paths
        .iter()
        .filter(|cp| cp.failed)
        .flat_map(|cp| cp.path.links.iter().copied())
        .collect()
}

/// A link is bad when it sits on more than `dlcthresh` of the failed paths.
fn direct_link_count(paths: &[ClassifiedLinkPath], dlcthresh: f64) -> LinkSet {
    let mut counts: BTreeMap<Link, f64> = BTreeMap::new();
    let mut failed_paths = 0.0;
    for cp in paths.iter().filter(|cp| cp.failed && !cp.path.is_empty()) {
        failed_paths += 1.0;
        for &link in &cp.path.links {
            *counts.entry(link).or_insert(0.0) += 1.0;
        }
    }
    if failed_paths > 0.0 {
        for value in counts.values_mut() {
            *value /= failed_paths;
        }
    }
    counts
        .into_iter()
        .filter(|&(_, share)| share > dlcthresh)
        .map(|(link, _)| link)
        .collect()
}

// ----- weight-based methods -----

/// Increase rule for failed paths: one factor, or one per severity level.
#[derive(Debug, Clone, Copy)]
enum WincRule {
    Single(f64),
    ThreeLevel { small: f64, medium: f64, large: f64 },
}

#[derive(Debug, Clone, Copy)]
struct WeightConfig {
    winc: WincRule,
    wdec: f64,
    wscale: f64,
    wthresh: f64,
    pathscale: bool,
    normalization: bool,
    bad_paths_only: bool,
}

impl WeightConfig {
    fn single(
        params: &MethodParams,
        method: LocalizationMethod,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            winc: WincRule::Single(require(params, method, "winc")?),
            wdec: require(params, method, "wdec")?,
            wscale: require(params, method, "wscale")?,
            wthresh: require(params, method, "wthresh")?,
            pathscale: require(params, method, "pathscale")? == 1.0,
            normalization: params.get("normalization").copied().unwrap_or(0.0) == 1.0,
            bad_paths_only: matches!(
                method,
                LocalizationMethod::WeightBad | LocalizationMethod::WeightBadLvl
            ),
        })
    }

    fn three_level(
        params: &MethodParams,
        method: LocalizationMethod,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            winc: WincRule::ThreeLevel {
                small: require(params, method, "winc_lvl1")?,
                medium: require(params, method, "winc_lvl2")?,
                large: require(params, method, "winc_lvl3")?,
            },
            wdec: require(params, method, "wdec")?,
            wscale: require(params, method, "wscale")?,
            wthresh: require(params, method, "wthresh")?,
            pathscale: require(params, method, "pathscale")? == 1.0,
            normalization: params.get("normalization").copied().unwrap_or(0.0) == 1.0,
            bad_paths_only: matches!(
                method,
                LocalizationMethod::WeightBad | LocalizationMethod::WeightBadLvl
            ),
        })
    }

    fn path_is_failed(&self, cp: &ClassifiedLinkPath) -> bool {
        match self.winc {
            WincRule::Single(_) => cp.failed,
            WincRule::ThreeLevel { .. } => {
                cp.small_failure || cp.medium_failure || cp.large_failure
            }
        }
    }

    /// The per-path increase factor; the strongest severity flag picks the
    /// alpha in the three-level variant.
    fn increase_factor(&self, cp: &ClassifiedLinkPath) -> Result<f64, AnalysisError> {
        let winc = match self.winc {
            WincRule::Single(winc) => winc,
            WincRule::ThreeLevel {
                small,
                medium,
                large,
            } => {
                if cp.large_failure {
                    large
                } else if cp.medium_failure {
                    medium
                } else if cp.small_failure {
                    small
                } else {
                    return Err(AnalysisError::UnclassifiedFailedPath);
                }
            }
        };
        let factor = if self.pathscale {
            1.0 + winc - winc * (1.0 - 1.0 / cp.path.len() as f64) * self.wscale
        } else {
            1.0 + winc * self.wscale
        };
        Ok(factor)
    }

    fn initial_weight(&self, universe: usize) -> f64 {
        if self.normalization {
            1.0 / universe as f64
        } else {
            1.0
        }
    }
}

fn require(
    params: &MethodParams,
    method: LocalizationMethod,
    param: &'static str,
) -> Result<f64, AnalysisError> {
    params
        .get(param)
        .copied()
        .ok_or(AnalysisError::MissingParam { method, param })
}

/// Multiplicative link weighting over all paths. With `bad_paths_only`, good
/// paths are skipped and each failed path also decays every off-path link.
fn calculate_link_weights(
    paths: &[ClassifiedLinkPath],
    all_links: &[Link],
    cfg: &WeightConfig,
) -> Result<BTreeMap<Link, f64>, AnalysisError> {
    let mut weights: BTreeMap<Link, f64> = BTreeMap::new();
    let initial = cfg.initial_weight(all_links.len());

    for cp in paths {
        if cp.path.is_empty() {
            continue;
        }
        let failed = cfg.path_is_failed(cp);

        if cfg.bad_paths_only {
            if !failed {
                continue;
            }
            let inc = cfg.increase_factor(cp)?;
            for &link in all_links {
                let w = weights.entry(link).or_insert(initial);
                if cp.path.contains_link(link) {
                    *w *= inc;
                } else {
                    *w *= cfg.wdec;
                }
            }
        } else if failed {
            let inc = cfg.increase_factor(cp)?;
            for &link in &cp.path.links {
                *weights.entry(link).or_insert(initial) *= inc;
            }
        } else {
            for &link in &cp.path.links {
                *weights.entry(link).or_insert(initial) *= cfg.wdec;
            }
        }

        if cfg.normalization {
            for &link in all_links {
                weights.entry(link).or_insert(initial);
            }
            let total: f64 = weights.values().sum();
            if total > 0.0 {
                for w in weights.values_mut() {
                    *w /= total;
                }
            }
        }
    }
    Ok(weights)
}

fn threshold_weights(weights: &BTreeMap<Link, f64>, wthresh: f64) -> LinkSet {
    weights
        .iter()
        .filter(|&(_, &w)| w > wthresh)
        .map(|(&link, _)| link)
        .collect()
}

/// Repeatedly blames the single heaviest link above the threshold and
/// removes every path crossing it. Terminates after at most one iteration
/// per distinct link.
fn iterative_weighted_failed_links(
    paths: &[ClassifiedLinkPath],
    all_links: &[Link],
    cfg: &WeightConfig,
) -> Result<LinkSet, AnalysisError> {
    let mut bad = LinkSet::new();
    let mut remaining: Vec<ClassifiedLinkPath> = paths.to_vec();

    loop {
        let weights = calculate_link_weights(&remaining, all_links, cfg)?;
        let heaviest = weights
            .iter()
            .fold(None::<(Link, f64)>, |acc, (&link, &w)| match acc {
                Some((_, best)) if best >= w => acc,
                _ => Some((link, w)),
            });
        match heaviest {
            Some((link, weight)) if weight > cfg.wthresh => {
                bad.insert(link);
                remaining.retain(|cp| !cp.path.contains_link(link));
            }
            _ => break,
        }
    }
    Ok(bad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::EfmBit;
    use crate::linkpath::LinkPath;
    use efmloc_simdata::NodeId;

    fn link(a: u32, b: u32) -> Link {
        Link::new(NodeId::new(a), NodeId::new(b))
    }

    fn classified(links: Vec<Link>, failed: bool, measurement: f64) -> ClassifiedLinkPath {
        ClassifiedLinkPath {
            path: LinkPath::new(links),
            failed,
            small_failure: failed,
            medium_failure: failed,
            large_failure: false,
            measurement,
        }
    }

    /// The seed scenario: one failed path covering the whole A-M-B chain.
    fn chain_paths() -> Vec<ClassifiedLinkPath> {
        vec![classified(vec![link(0, 1), link(1, 2)], true, 0.2)]
    }

    #[test]
    fn detection_and_possible_blame_the_whole_failed_path() {
        let paths = chain_paths();
        let expected: LinkSet = [link(0, 1), link(1, 2)].into_iter().collect();
        assert_eq!(detect_failed_links(&paths), expected);
        assert_eq!(possible_failed_links(&paths), expected);
        // No good path isolates a single suspect.
        assert!(probable_failed_links(&paths).is_empty());
    }

    #[test]
    fn possible_retracts_links_seen_good_later() {
        let paths = vec![
            classified(vec![link(0, 1), link(1, 2)], true, 0.2),
            classified(vec![link(0, 1)], false, 0.0),
        ];
        let bad = possible_failed_links(&paths);
        assert_eq!(bad, [link(1, 2)].into_iter().collect());
    }

    #[test]
    fn probable_needs_exactly_one_suspect() {
        let paths = vec![
            classified(vec![link(0, 1)], false, 0.0),
            classified(vec![link(0, 1), link(1, 2)], true, 0.2),
        ];
        assert_eq!(
            probable_failed_links(&paths),
            [link(1, 2)].into_iter().collect::<LinkSet>()
        );

        let wide = vec![classified(vec![link(0, 1), link(1, 2)], true, 0.2)];
        assert!(probable_failed_links(&wide).is_empty());
    }

    #[test]
    fn dlc_normalizes_by_failed_path_count() {
        let paths = vec![
            classified(vec![link(0, 1), link(1, 2)], true, 0.2),
            classified(vec![link(1, 2)], true, 0.2),
            classified(vec![link(5, 6)], false, 0.0),
        ];
        // link(1,2) on 2/2 failed paths, link(0,1) on 1/2.
        assert_eq!(
            direct_link_count(&paths, 0.75),
            [link(1, 2)].into_iter().collect::<LinkSet>()
        );
        assert_eq!(
            direct_link_count(&paths, 0.25),
            [link(0, 1), link(1, 2)].into_iter().collect::<LinkSet>()
        );
    }

    fn weight_params() -> MethodParams {
        [
            ("winc".to_owned(), 1.0),
            ("wdec".to_owned(), 0.5),
            ("wscale".to_owned(), 1.0),
            ("wthresh".to_owned(), 1.5),
            ("pathscale".to_owned(), 0.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn direct_weighting_thresholds_weights() -> anyhow::Result<()> {
        let all_links = vec![link(0, 1), link(1, 2)];
        let paths = vec![
            classified(vec![link(0, 1), link(1, 2)], true, 0.2),
            classified(vec![link(0, 1)], false, 0.0),
        ];
        let cfg = WeightConfig::single(&weight_params(), LocalizationMethod::WeightDir)?;
        let weights = calculate_link_weights(&paths, &all_links, &cfg)?;
        // link(0,1): 1 * 2.0 * 0.5 = 1.0; link(1,2): 1 * 2.0 = 2.0.
        assert!((weights[&link(0, 1)] - 1.0).abs() < 1e-12);
        assert!((weights[&link(1, 2)] - 2.0).abs() < 1e-12);
        assert_eq!(
            threshold_weights(&weights, 1.5),
            [link(1, 2)].into_iter().collect::<LinkSet>()
        );
        Ok(())
    }

    #[test]
    fn iterative_weighting_terminates_within_link_count() -> anyhow::Result<()> {
        let all_links = vec![link(0, 1), link(1, 2), link(2, 3)];
        let paths = vec![
            classified(vec![link(0, 1), link(1, 2)], true, 0.2),
            classified(vec![link(1, 2), link(2, 3)], true, 0.2),
            classified(vec![link(2, 3)], true, 0.2),
        ];
        let cfg = WeightConfig::single(&weight_params(), LocalizationMethod::WeightIter)?;
        let bad = iterative_weighted_failed_links(&paths, &all_links, &cfg)?;
        assert!(bad.len() <= all_links.len());
        assert!(!bad.is_empty());
        Ok(())
    }

    #[test]
    fn three_level_requires_a_severity_flag() {
        let mut params = weight_params();
        params.extend([
            ("winc_lvl1".to_owned(), 0.5),
            ("winc_lvl2".to_owned(), 1.0),
            ("winc_lvl3".to_owned(), 2.0),
        ]);
        let cfg = WeightConfig::three_level(&params, LocalizationMethod::WeightDirLvl).unwrap();
        let mut path = classified(vec![link(0, 1)], true, 0.2);
        path.small_failure = false;
        path.medium_failure = false;
        path.large_failure = false;
        // `failed` is irrelevant for the three-level predicate; with no
        // severity flag the path is treated as good.
        assert!(!cfg.path_is_failed(&path));
        path.small_failure = true;
        assert!(cfg.path_is_failed(&path));
        assert!(cfg.increase_factor(&path).is_ok());
    }

    #[test]
    fn missing_params_are_reported() {
        let paths = chain_paths();
        let res = localize_classified(
            &paths,
            &[link(0, 1), link(1, 2)],
            &[EfmBit::Seq].into_iter().collect(),
            LocalizationMethod::WeightDir,
            &MethodParams::new(),
            0.1,
            10.0,
            &WarningCounter::new(),
        );
        assert!(matches!(res, Err(AnalysisError::MissingParam { .. })));
    }

    #[test]
    fn lsqr_localization_recovers_series_losses() -> anyhow::Result<()> {
        let links = vec![link(0, 1), link(1, 2), link(2, 3)];
        let index = LinkIndex::from_links(&links)?;
        let matrix = vec![vec![1, 1, 1], vec![1, 1, 0], vec![0, 1, 1]];
        let ete = 1.0 - 0.9 * 1.0 * 0.8;
        let vector = vec![ete, 0.1, 0.2];
        let bits: EfmBitSet = [EfmBit::Q].into_iter().collect();
        let warn = WarningCounter::new();

        let result = localize_linear(
            &matrix,
            &vector,
            &index,
            &bits,
            LocalizationMethod::LinLsqr,
            &MethodParams::new(),
            0.05,
            10.0,
            &warn,
        )?
        .expect("system is non-empty");

        let expected = [0.1, 0.0, 0.2];
        for (l, want) in links.iter().zip(expected) {
            let got = result.link_ratings[l];
            assert!((got - want).abs() < 1e-6, "{l}: {got} vs {want}");
        }
        assert_eq!(
            result.failed_links,
            [link(0, 1), link(2, 3)].into_iter().collect::<LinkSet>()
        );
        Ok(())
    }

    #[test]
    fn lsqr_with_zero_measurements_rates_all_links_zero() -> anyhow::Result<()> {
        let links = vec![link(0, 1), link(1, 2)];
        let index = LinkIndex::from_links(&links)?;
        let matrix = vec![vec![1, 0], vec![0, 1]];
        let vector = vec![0.0, 0.0];
        let bits: EfmBitSet = [EfmBit::Q].into_iter().collect();
        let result = localize_linear(
            &matrix,
            &vector,
            &index,
            &bits,
            LocalizationMethod::LinLsqr,
            &MethodParams::new(),
            0.05,
            10.0,
            &WarningCounter::new(),
        )?
        .expect("system is non-empty");
        assert!(result.link_ratings.values().all(|&r| r.abs() < 1e-9));
        assert!(result.failed_links.is_empty());
        Ok(())
    }

    #[test]
    fn lsqr_rejects_negative_and_drops_full_loss() {
        let links = vec![link(0, 1)];
        let index = LinkIndex::from_links(&links).unwrap();
        let bits: EfmBitSet = [EfmBit::Q].into_iter().collect();

        let res = localize_linear(
            &vec![vec![1]],
            &vec![-0.1],
            &index,
            &bits,
            LocalizationMethod::LinLsqr,
            &MethodParams::new(),
            0.05,
            10.0,
            &WarningCounter::new(),
        );
        assert!(matches!(res, Err(AnalysisError::NegativeLossRate(_))));

        let res = localize_linear(
            &vec![vec![1]],
            &vec![1.0],
            &index,
            &bits,
            LocalizationMethod::LinLsqr,
            &MethodParams::new(),
            0.05,
            10.0,
            &WarningCounter::new(),
        )
        .unwrap();
        // The only row is dropped, leaving nothing to solve.
        assert!(res.is_none());
    }

    #[test]
    fn raising_the_threshold_never_enlarges_the_result() -> anyhow::Result<()> {
        let links = vec![link(0, 1), link(1, 2), link(2, 3)];
        let index = LinkIndex::from_links(&links)?;
        let matrix = vec![vec![1, 1, 1], vec![1, 1, 0], vec![0, 1, 1]];
        let vector = vec![1.0 - 0.9 * 0.8, 0.1, 0.2];
        let bits: EfmBitSet = [EfmBit::Q].into_iter().collect();

        let mut previous: Option<LinkSet> = None;
        for threshold in [0.01, 0.05, 0.15, 0.5] {
            let result = localize_linear(
                &matrix,
                &vector,
                &index,
                &bits,
                LocalizationMethod::LinLsqr,
                &MethodParams::new(),
                threshold,
                10.0,
                &WarningCounter::new(),
            )?
            .expect("system is non-empty");
            if let Some(prev) = previous {
                assert!(result.failed_links.is_subset(&prev));
            }
            previous = Some(result.failed_links);
        }
        Ok(())
    }
}
