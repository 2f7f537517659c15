//! Per-run orchestration: measurement storage and the localization grid of
//! one analysis configuration.

use std::collections::BTreeMap;

use efmloc_simdata::{ObserverFlow, PathMeasurements, PingPair, ResultSet, TraceFilter};

use crate::bits::EfmBitSet;
use crate::classified::{ClassificationMode, ObserverSet};
use crate::driver::{localize_failures, LocalizeRun};
use crate::errors::AnalysisError;
use crate::localization::{LocalizationMethod, MethodParams};
use crate::output::{OutputAccumulator, ResultType};
use crate::selection::{FlowSelection, FlowSelectionStrategy, StrategyParams};
use crate::warnings::WarningCounter;

/// One entry of the analysis configuration document, resolved into typed
/// form by the frontend.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub store_measurements: bool,
    pub perform_localization: bool,
    pub classification_base_id: String,
    pub observer_sets: Vec<ObserverSet>,
    pub efm_bit_sets: Vec<EfmBitSet>,
    pub loss_rate_th: Option<f64>,
    pub delay_th_ms: Option<f64>,
    pub flow_length_th: u32,
    pub auto_loss_rate_th_offset: Option<f64>,
    pub auto_delay_th_offset_ms: Option<f64>,
    pub classification_modes: Vec<ClassificationMode>,
    pub localization_methods: BTreeMap<LocalizationMethod, MethodParams>,
    pub flow_selection_strategies: BTreeMap<FlowSelectionStrategy, StrategyParams>,
    pub sim_filter: TraceFilter,
    /// Already scaled to ms by the loader.
    pub time_filter_ms: f64,
    pub output_raw_values: bool,
}

/// Runs all configurations against one result set. Measurements are stored
/// at most once across configs (the first config asking wins).
pub fn run_analyses(
    srs: &ResultSet,
    configs: &[AnalysisConfig],
    out: &mut OutputAccumulator,
    warn: &WarningCounter,
) -> Result<(), AnalysisError> {
    let mut stored_measurements = false;
    for config in configs {
        let store = config.store_measurements && !stored_measurements;
        stored_measurements |= store;
        run_analysis(srs, config, store, out, warn)?;
    }
    Ok(())
}

fn run_analysis(
    srs: &ResultSet,
    config: &AnalysisConfig,
    store_measurements: bool,
    out: &mut OutputAccumulator,
    warn: &WarningCounter,
) -> Result<(), AnalysisError> {
    if store_measurements {
        store_observer_measurements(srs, config, out)?;
    }

    if !config.perform_localization {
        return Ok(());
    }

    // An empty configured observer set means every real observer.
    let mut observer_sets = config.observer_sets.clone();
    for set in &mut observer_sets {
        if set.observers.is_empty() {
            set.observers = srs.observer_ids(true, true);
        }
    }

    // Thresholds derive from the unfiltered ground truth.
    let loss_rate_th = effective_loss_threshold(srs, config);
    let delay_th_ms = effective_delay_threshold(srs, config);

    let filtered = srs.apply_filter(&config.sim_filter);

    for &mode in &config.classification_modes {
        for (&strategy, params) in &config.flow_selection_strategies {
            let flow_selection = FlowSelection {
                strategy,
                params: params.clone(),
            };
            let run = LocalizeRun::builder()
                .observer_sets(&observer_sets)
                .efm_bit_sets(&config.efm_bit_sets)
                .loss_rate_th(loss_rate_th)
                .delay_th_ms(delay_th_ms)
                .flow_length_th(config.flow_length_th)
                .mode(mode)
                .methods(&config.localization_methods)
                .classification_base_id(&config.classification_base_id)
                .time_filter(config.time_filter_ms)
                .flow_selection(&flow_selection)
                .build();
            let results = localize_failures(&filtered, run, warn)?;
            for (class_config, loc_results) in results {
                out.add_localization_results(
                    config.sim_filter,
                    class_config,
                    loc_results,
                    flow_selection.clone(),
                );
            }
        }
    }
    Ok(())
}

/// The loss threshold: configured directly, or the smallest positive injected
/// loss rate plus the configured offset (never below zero).
fn effective_loss_threshold(srs: &ResultSet, config: &AnalysisConfig) -> f64 {
    if let Some(th) = config.loss_rate_th {
        return th;
    }
    let offset = config.auto_loss_rate_th_offset.unwrap_or(0.0);
    let smallest = srs
        .failed_links()
        .values()
        .map(|fl| fl.loss_rate)
        .filter(|&rate| rate > 0.0)
        .fold(None::<f64>, |acc, rate| match acc {
            Some(best) if best <= rate => Some(best),
            _ => Some(rate),
        })
        .unwrap_or(0.0);
    (smallest + offset).max(0.0)
}

fn effective_delay_threshold(srs: &ResultSet, config: &AnalysisConfig) -> f64 {
    if let Some(th) = config.delay_th_ms {
        return th;
    }
    let offset = config.auto_delay_th_offset_ms.unwrap_or(0.0);
    let smallest = srs
        .failed_links()
        .values()
        .map(|fl| f64::from(fl.delay_ms))
        .filter(|&delay| delay > 0.0)
        .fold(None::<f64>, |acc, delay| match acc {
            Some(best) if best <= delay => Some(best),
            _ => Some(delay),
        })
        .unwrap_or(0.0);
    (smallest + offset).max(0.0)
}

const FLOW_RESULT_TYPES: [ResultType; 18] = [
    ResultType::SeqRelLoss,
    ResultType::SeqAbsLoss,
    ResultType::AckSeqRelLoss,
    ResultType::AckSeqAbsLoss,
    ResultType::QRelLoss,
    ResultType::QAbsLoss,
    ResultType::RRelLoss,
    ResultType::RAbsLoss,
    ResultType::TRelFullLoss,
    ResultType::TAbsFullLoss,
    ResultType::TRelHalfLoss,
    ResultType::TAbsHalfLoss,
    ResultType::LRelLoss,
    ResultType::LAbsLoss,
    ResultType::SpinAvgDelay,
    ResultType::TcpdartAvgDelay,
    ResultType::TcproAbsLoss,
    ResultType::TcproRelLoss,
];

const FLOW_RESULT_TYPES_RAW: [ResultType; 2] =
    [ResultType::SpinDelayRaw, ResultType::TcpdartDelayRaw];

const PATH_RESULT_TYPES: [ResultType; 4] = [
    ResultType::SqRelLoss,
    ResultType::SqAbsLoss,
    ResultType::LRelLoss,
    ResultType::LAbsLoss,
];

const PING_CLIENT_RESULT_TYPES: [ResultType; 3] = [
    ResultType::PingClntAbsLoss,
    ResultType::PingClntRelLoss,
    ResultType::PingClntAvgDelay,
];

const PING_SERVER_RESULT_TYPES: [ResultType; 3] = [
    ResultType::PingSvrAbsLoss,
    ResultType::PingSvrRelLoss,
    ResultType::PingSvrAvgDelay,
];

fn store_observer_measurements(
    srs: &ResultSet,
    config: &AnalysisConfig,
    out: &mut OutputAccumulator,
) -> Result<(), AnalysisError> {
    for observer_id in srs.observer_ids(true, true) {
        let vp = srs.observer_or_err(observer_id)?;

        for flow_id in vp.flow_ids().collect::<Vec<_>>() {
            let flow = vp.flow_or_err(flow_id)?;
            for result_type in FLOW_RESULT_TYPES {
                if let Some(value) = flow_result(flow, result_type, config.time_filter_ms) {
                    out.add_observer_flow_result(observer_id, flow_id, result_type, value);
                }
            }
            if config.output_raw_values {
                for result_type in FLOW_RESULT_TYPES_RAW {
                    if let Some(values) = flow_raw_values(flow, result_type, config.time_filter_ms)
                    {
                        out.add_observer_flow_raw_values(observer_id, flow_id, result_type, values);
                    }
                }
            }
        }

        for path_id in vp.path_ids().collect::<Vec<_>>() {
            if let Some(path) = vp.path(path_id) {
                for result_type in PATH_RESULT_TYPES {
                    out.add_observer_path_result(
                        observer_id,
                        path_id,
                        result_type,
                        path_result(path, result_type),
                    );
                }
            }
        }

        for (target, pp) in vp.client_ping_pairs() {
            for result_type in PING_CLIENT_RESULT_TYPES {
                if let Some(value) = ping_result(pp, result_type) {
                    out.add_observer_active_result(observer_id, target, result_type, value);
                }
            }
            if config.output_raw_values {
                let values: Vec<f64> = pp.raw_delay_values().collect();
                if !values.is_empty() {
                    out.add_observer_active_raw_values(
                        observer_id,
                        target,
                        ResultType::PingClntDelayRaw,
                        values,
                    );
                }
            }
        }

        for (target, pp) in vp.server_ping_pairs() {
            for result_type in PING_SERVER_RESULT_TYPES {
                if let Some(value) = ping_result(pp, result_type) {
                    out.add_observer_active_result(observer_id, target, result_type, value);
                }
            }
            if config.output_raw_values {
                let values: Vec<f64> = pp.raw_delay_values().collect();
                if !values.is_empty() {
                    out.add_observer_active_raw_values(
                        observer_id,
                        target,
                        ResultType::PingSvrDelayRaw,
                        values,
                    );
                }
            }
        }
    }
    Ok(())
}

fn flow_result(flow: &ObserverFlow, result_type: ResultType, time_filter: f64) -> Option<f64> {
    let value = match result_type {
        ResultType::SeqRelLoss => flow.relative_seq_loss(),
        ResultType::SeqAbsLoss => f64::from(flow.absolute_seq_loss()),
        ResultType::AckSeqRelLoss => flow.relative_ack_seq_loss(),
        ResultType::AckSeqAbsLoss => f64::from(flow.absolute_ack_seq_loss()),
        ResultType::QRelLoss => flow.relative_q_bit_loss(),
        ResultType::QAbsLoss => f64::from(flow.absolute_q_bit_loss()),
        ResultType::RRelLoss => flow.relative_r_bit_loss(),
        ResultType::RAbsLoss => f64::from(flow.absolute_r_bit_loss()),
        ResultType::TRelFullLoss => flow.relative_t_bit_full_loss(),
        ResultType::TAbsFullLoss => f64::from(flow.absolute_t_bit_full_loss()),
        ResultType::TRelHalfLoss => flow.relative_t_bit_half_loss(),
        ResultType::TAbsHalfLoss => f64::from(flow.absolute_t_bit_half_loss()),
        ResultType::LRelLoss => flow.relative_l_bit_loss(),
        ResultType::LAbsLoss => f64::from(flow.absolute_l_bit_loss()),
        ResultType::SpinAvgDelay => return flow.avg_spin_rt_delay(time_filter),
        ResultType::TcpdartAvgDelay => return flow.avg_tcp_dart_delay(),
        ResultType::TcproAbsLoss => f64::from(flow.absolute_tcp_reordering()),
        ResultType::TcproRelLoss => flow.relative_tcp_reordering(),
        _ => unreachable!("not a flow result type"),
    };
    Some(value)
}

fn flow_raw_values(
    flow: &ObserverFlow,
    result_type: ResultType,
    time_filter: f64,
) -> Option<Vec<f64>> {
    let values: Vec<f64> = match result_type {
        ResultType::SpinDelayRaw => flow.raw_spin_rt_values(time_filter).collect(),
        ResultType::TcpdartDelayRaw => flow.raw_tcp_dart_values().collect(),
        _ => unreachable!("not a raw flow result type"),
    };
    (!values.is_empty()).then_some(values)
}

fn path_result(path: &PathMeasurements, result_type: ResultType) -> f64 {
    match result_type {
        ResultType::SqRelLoss => path.relative_final_sq_bits_loss(),
        ResultType::SqAbsLoss => f64::from(path.absolute_final_sq_bits_loss()),
        ResultType::LRelLoss => path.relative_l_bit_loss(),
        ResultType::LAbsLoss => f64::from(path.absolute_l_bit_loss()),
        _ => unreachable!("not a path result type"),
    }
}

fn ping_result(pp: &PingPair, result_type: ResultType) -> Option<f64> {
    let value = match result_type {
        ResultType::PingClntAbsLoss | ResultType::PingSvrAbsLoss => f64::from(pp.absolute_loss()),
        ResultType::PingClntRelLoss | ResultType::PingSvrRelLoss => pp.relative_loss(),
        ResultType::PingClntAvgDelay | ResultType::PingSvrAvgDelay => return pp.avg_delay(),
        _ => unreachable!("not a ping result type"),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use efmloc_simdata::{testing, FlowId, NodeId};

    fn minimal_config() -> AnalysisConfig {
        AnalysisConfig {
            store_measurements: true,
            perform_localization: false,
            classification_base_id: "default_id_0".into(),
            observer_sets: Vec::new(),
            efm_bit_sets: Vec::new(),
            loss_rate_th: Some(0.1),
            delay_th_ms: Some(10.0),
            flow_length_th: 0,
            auto_loss_rate_th_offset: None,
            auto_delay_th_offset_ms: None,
            classification_modes: Vec::new(),
            localization_methods: BTreeMap::new(),
            flow_selection_strategies: BTreeMap::new(),
            sim_filter: TraceFilter::default(),
            time_filter_ms: f64::MAX,
            output_raw_values: false,
        }
    }

    #[test]
    fn auto_thresholds_use_smallest_positive_rates() {
        let mut srs = testing::empty_result_set();
        for (a, b, loss, delay) in [(0u32, 1u32, 0.0, 0), (1, 2, 0.3, 20), (2, 3, 0.1, 5)] {
            srs.add_failed_link(efmloc_simdata::FailedLink {
                source_node_id: NodeId::new(a),
                dest_node_id: NodeId::new(b),
                loss_rate: loss,
                delay_ms: delay,
            });
        }
        let mut config = minimal_config();
        config.loss_rate_th = None;
        config.auto_loss_rate_th_offset = Some(-0.05);
        config.delay_th_ms = None;
        config.auto_delay_th_offset_ms = Some(-10.0);

        let loss = effective_loss_threshold(&srs, &config);
        assert!((loss - 0.05).abs() < 1e-12);
        // Offsets never push a threshold below zero.
        let delay = effective_delay_threshold(&srs, &config);
        assert_eq!(delay, 0.0);
    }

    #[test]
    fn auto_thresholds_default_to_zero_without_failed_links() {
        let srs = testing::empty_result_set();
        let mut config = minimal_config();
        config.loss_rate_th = None;
        config.auto_loss_rate_th_offset = Some(0.02);
        assert!((effective_loss_threshold(&srs, &config) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn measurements_are_stored_once_across_configs() -> anyhow::Result<()> {
        let mut srs = testing::empty_result_set();
        let path: Vec<NodeId> = [0u32, 1, 2].iter().map(|&n| NodeId::new(n)).collect();
        testing::register_flow_pair(
            &mut srs,
            FlowId::new(1),
            FlowId::new(2),
            &path,
            testing::tuple(0, 2),
        );
        testing::add_observer_event(
            &mut srs,
            NodeId::new(1),
            testing::q_loss(FlowId::new(1), 2.0, 4),
        );
        srs.finish_import();

        let configs = vec![minimal_config(), minimal_config()];
        let mut out = OutputAccumulator::new();
        let warn = WarningCounter::new();
        run_analyses(&srs, &configs, &mut out, &warn)?;

        let doc = out.render(&srs)?;
        let flow_key = testing::tuple(0, 2).key();
        let q = &doc["observerFlowResults"]["1"][flow_key.as_str()]["q_rel_loss"];
        assert!((q.as_f64().unwrap() - 4.0 / 64.0).abs() < 1e-12);
        Ok(())
    }
}
