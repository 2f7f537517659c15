//! Loading and validating the analysis configuration document.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use efmloc_analysis::{
    AnalysisConfig, ClassificationMode, EfmBit, EfmBitSet, FlowSelectionStrategy,
    LocalizationMethod, MethodParams, ObserverSet, StrategyParams,
};
use efmloc_simdata::{NodeId, TraceFilter};

use crate::errors::FrontendError;

#[derive(Debug, Deserialize)]
struct AnalysisConfigDoc {
    #[serde(rename = "storeMeasurements")]
    store_measurements: bool,
    #[serde(rename = "performLocalization")]
    perform_localization: bool,
    classification_base_id: Option<String>,
    #[serde(rename = "observerSets")]
    observer_sets: Vec<ObserverSetDoc>,
    #[serde(rename = "efmBitSets")]
    efm_bit_sets: Vec<Vec<String>>,
    #[serde(rename = "classificationModes")]
    classification_modes: Vec<String>,
    #[serde(rename = "flowLengthTh", default)]
    flow_length_th: u32,
    #[serde(rename = "lossRateTh")]
    loss_rate_th: Option<f64>,
    #[serde(rename = "autoLossRateThOffset")]
    auto_loss_rate_th_offset: Option<f64>,
    #[serde(rename = "delayThMs")]
    delay_th_ms: Option<u32>,
    #[serde(rename = "autoDelayThOffsetMs")]
    auto_delay_th_offset_ms: Option<i32>,
    #[serde(rename = "localizationMethods")]
    localization_methods: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(rename = "flowSelectionStrategies")]
    flow_selection_strategies: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(rename = "simFilter")]
    sim_filter: TraceFilter,
    /// Seconds in the document; scaled to ms on load.
    time_filter_ms: f64,
    output_raw_values: bool,
}

/// Observer sets come as plain id arrays or as objects with metadata.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ObserverSetDoc {
    Plain(Vec<u32>),
    Tagged {
        observers: Vec<u32>,
        metadata: Option<serde_json::Value>,
    },
}

/// Loads the analysis-config array from a file.
pub fn load_configs(path: &Path) -> Result<Vec<AnalysisConfig>, FrontendError> {
    let text = std::fs::read_to_string(path)?;
    parse_configs(&text)
}

/// Parses and validates the analysis-config array.
pub fn parse_configs(text: &str) -> Result<Vec<AnalysisConfig>, FrontendError> {
    let docs: Vec<AnalysisConfigDoc> = serde_json::from_str(text)?;
    docs.into_iter()
        .enumerate()
        .map(|(n, doc)| resolve_config(doc, n))
        .collect()
}

fn resolve_config(doc: AnalysisConfigDoc, index: usize) -> Result<AnalysisConfig, FrontendError> {
    if doc.loss_rate_th.is_some() == doc.auto_loss_rate_th_offset.is_some() {
        return Err(FrontendError::ThresholdChoice(
            "lossRateTh / autoLossRateThOffset",
        ));
    }
    if doc.delay_th_ms.is_some() == doc.auto_delay_th_offset_ms.is_some() {
        return Err(FrontendError::ThresholdChoice(
            "delayThMs / autoDelayThOffsetMs",
        ));
    }

    let observer_sets = doc
        .observer_sets
        .into_iter()
        .map(|set| match set {
            ObserverSetDoc::Plain(ids) => ObserverSet {
                observers: ids.into_iter().map(NodeId::new).collect(),
                metadata: None,
            },
            ObserverSetDoc::Tagged {
                observers,
                metadata,
            } => ObserverSet {
                observers: observers.into_iter().map(NodeId::new).collect(),
                metadata,
            },
        })
        .collect();

    let efm_bit_sets = doc
        .efm_bit_sets
        .iter()
        .map(|names| {
            names
                .iter()
                .map(|name| parse_name::<EfmBit>("EFM bit", name))
                .collect::<Result<EfmBitSet, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    // Mixing loss and delay bits in one set is a config error; surface it
    // now rather than at dispatch time.
    for bits in &efm_bit_sets {
        efmloc_analysis::bit_set_is_loss(bits)?;
    }

    let classification_modes = doc
        .classification_modes
        .iter()
        .map(|name| parse_name::<ClassificationMode>("classification mode", name))
        .collect::<Result<Vec<_>, _>>()?;

    let localization_methods = doc
        .localization_methods
        .into_iter()
        .map(|(name, params)| {
            Ok((
                parse_name::<LocalizationMethod>("localization method", &name)?,
                params.into_iter().collect::<MethodParams>(),
            ))
        })
        .collect::<Result<BTreeMap<_, _>, FrontendError>>()?;

    let flow_selection_strategies = doc
        .flow_selection_strategies
        .into_iter()
        .map(|(name, params)| {
            Ok((
                parse_name::<FlowSelectionStrategy>("flow selection strategy", &name)?,
                params.into_iter().collect::<StrategyParams>(),
            ))
        })
        .collect::<Result<BTreeMap<_, _>, FrontendError>>()?;

    Ok(AnalysisConfig {
        store_measurements: doc.store_measurements,
        perform_localization: doc.perform_localization,
        classification_base_id: doc
            .classification_base_id
            .unwrap_or_else(|| format!("default_id_{index}")),
        observer_sets,
        efm_bit_sets,
        loss_rate_th: doc.loss_rate_th,
        delay_th_ms: doc.delay_th_ms.map(f64::from),
        flow_length_th: doc.flow_length_th,
        auto_loss_rate_th_offset: doc.auto_loss_rate_th_offset,
        auto_delay_th_offset_ms: doc.auto_delay_th_offset_ms.map(f64::from),
        classification_modes,
        localization_methods,
        flow_selection_strategies,
        sim_filter: doc.sim_filter,
        time_filter_ms: doc.time_filter_ms * 1000.0,
        output_raw_values: doc.output_raw_values,
    })
}

fn parse_name<T: FromStr>(kind: &'static str, value: &str) -> Result<T, FrontendError> {
    T::from_str(value).map_err(|_| FrontendError::UnknownName {
        kind,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_json(extra: &str) -> String {
        format!(
            r#"[{{
                "storeMeasurements": true,
                "performLocalization": true,
                "efmBitSets": [["Q", "L"], ["SPIN"]],
                "classificationModes": ["STATIC", "PERFECT"],
                "flowLengthTh": 100,
                "observerSets": [[1, 2], {{"observers": [3], "metadata": {{"tier": "core"}}}}],
                "lossRateTh": 0.05,
                "autoDelayThOffsetMs": -5,
                "localizationMethods": {{"DETECTION": {{}}, "WEIGHT_DIR": {{"winc": 1.0, "wdec": 0.5, "wscale": 1.0, "wthresh": 2.0, "pathscale": 1.0}}}},
                "flowSelectionStrategies": {{"ALL": {{}}, "RANDOM": {{"flow_count": 5}}}},
                "simFilter": {{"lBitTriggeredMonitoring": true, "removeLastXSpinTransients": 3}},
                "time_filter_ms": 2.5,
                "output_raw_values": false
                {extra}
            }}]"#
        )
    }

    #[test]
    fn full_config_round_trips() {
        let configs = parse_configs(&config_json("")).unwrap();
        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.classification_base_id, "default_id_0");
        assert_eq!(config.efm_bit_sets.len(), 2);
        assert!(config.efm_bit_sets[0].contains(&EfmBit::Q));
        assert_eq!(config.observer_sets[1].observers.len(), 1);
        assert!(config.observer_sets[1].metadata.is_some());
        assert_eq!(config.loss_rate_th, Some(0.05));
        assert_eq!(config.auto_delay_th_offset_ms, Some(-5.0));
        // Seconds become milliseconds on load.
        assert!((config.time_filter_ms - 2500.0).abs() < 1e-12);
        assert!(config.sim_filter.l_bit_triggered_monitoring);
        assert!(config
            .localization_methods
            .contains_key(&LocalizationMethod::WeightDir));
        assert!(config
            .flow_selection_strategies
            .contains_key(&FlowSelectionStrategy::Random));
    }

    #[test]
    fn explicit_base_id_is_kept() {
        let configs =
            parse_configs(&config_json(r#", "classification_base_id": "run-a""#)).unwrap();
        assert_eq!(configs[0].classification_base_id, "run-a");
    }

    #[test]
    fn unknown_method_names_are_config_errors() {
        let text = config_json("").replace("DETECTION", "GUESSING");
        assert!(matches!(
            parse_configs(&text),
            Err(FrontendError::UnknownName { .. })
        ));
    }

    #[test]
    fn mixed_bit_sets_are_config_errors() {
        let text = config_json("").replace(r#"["Q", "L"]"#, r#"["Q", "SPIN"]"#);
        assert!(matches!(
            parse_configs(&text),
            Err(FrontendError::Analysis(_))
        ));
    }

    #[test]
    fn both_loss_thresholds_is_an_error() {
        let text = config_json(r#", "autoLossRateThOffset": 0.01"#);
        assert!(matches!(
            parse_configs(&text),
            Err(FrontendError::ThresholdChoice(_))
        ));
    }
}
