//! In-memory accumulation of per-observer metrics and localization results,
//! rendered into the run's output document at the end.

use std::collections::BTreeMap;

use serde_json::json;

use efmloc_simdata::{FlowId, NodeId, PathId, ResultSet, TraceFilter};

use crate::classified::ClassificationConfig;
use crate::errors::AnalysisError;
use crate::localization::LocalizationResult;
use crate::selection::FlowSelection;

/// Every stored per-observer metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum ResultType {
    #[strum(serialize = "seq_rel_loss")]
    SeqRelLoss,
    #[strum(serialize = "seq_abs_loss")]
    SeqAbsLoss,
    #[strum(serialize = "ack_seq_rel_loss")]
    AckSeqRelLoss,
    #[strum(serialize = "ack_seq_abs_loss")]
    AckSeqAbsLoss,
    #[strum(serialize = "q_rel_loss")]
    QRelLoss,
    #[strum(serialize = "q_abs_loss")]
    QAbsLoss,
    #[strum(serialize = "r_rel_loss")]
    RRelLoss,
    #[strum(serialize = "r_abs_loss")]
    RAbsLoss,
    #[strum(serialize = "t_rel_full_loss")]
    TRelFullLoss,
    #[strum(serialize = "t_abs_full_loss")]
    TAbsFullLoss,
    #[strum(serialize = "t_rel_half_loss")]
    TRelHalfLoss,
    #[strum(serialize = "t_abs_half_loss")]
    TAbsHalfLoss,
    #[strum(serialize = "l_rel_loss")]
    LRelLoss,
    #[strum(serialize = "l_abs_loss")]
    LAbsLoss,
    #[strum(serialize = "spin_avg_delay")]
    SpinAvgDelay,
    #[strum(serialize = "sq_rel_loss")]
    SqRelLoss,
    #[strum(serialize = "sq_abs_loss")]
    SqAbsLoss,
    #[strum(serialize = "tcpdart_avg_delay")]
    TcpdartAvgDelay,
    #[strum(serialize = "tcpro_abs_loss")]
    TcproAbsLoss,
    #[strum(serialize = "tcpro_rel_loss")]
    TcproRelLoss,
    #[strum(serialize = "ping_clnt_abs_loss")]
    PingClntAbsLoss,
    #[strum(serialize = "ping_clnt_rel_loss")]
    PingClntRelLoss,
    #[strum(serialize = "ping_clnt_avg_delay")]
    PingClntAvgDelay,
    #[strum(serialize = "ping_svr_abs_loss")]
    PingSvrAbsLoss,
    #[strum(serialize = "ping_svr_rel_loss")]
    PingSvrRelLoss,
    #[strum(serialize = "ping_svr_avg_delay")]
    PingSvrAvgDelay,
    #[strum(serialize = "spin_delay_raw")]
    SpinDelayRaw,
    #[strum(serialize = "tcpdart_delay_raw")]
    TcpdartDelayRaw,
    #[strum(serialize = "ping_clnt_delay_raw")]
    PingClntDelayRaw,
    #[strum(serialize = "ping_svr_delay_raw")]
    PingSvrDelayRaw,
}

/// One localization batch, as configured and as computed.
#[derive(Debug, Clone)]
pub struct LocalizationResultSet {
    pub filter: TraceFilter,
    pub config: ClassificationConfig,
    pub results: Vec<LocalizationResult>,
    pub flow_selection: FlowSelection,
}

type ScalarResults = BTreeMap<NodeId, BTreeMap<u32, BTreeMap<ResultType, f64>>>;
type RawResults = BTreeMap<NodeId, BTreeMap<u32, BTreeMap<ResultType, Vec<f64>>>>;

/// Collects everything that ends up in the output document. Single-owner;
/// serialized once at run end.
#[derive(Debug, Default)]
pub struct OutputAccumulator {
    observer_flow_results: ScalarResults,
    observer_flow_raw_values: RawResults,
    observer_path_results: ScalarResults,
    observer_active_results: ScalarResults,
    observer_active_raw_values: RawResults,
    localization_results: Vec<LocalizationResultSet>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer_flow_result(
        &mut self,
        observer: NodeId,
        flow: FlowId,
        result_type: ResultType,
        value: f64,
    ) {
        self.observer_flow_results
            .entry(observer)
            .or_default()
            .entry(flow.inner())
            .or_default()
            .insert(result_type, value);
    }

    pub fn add_observer_flow_raw_values(
        &mut self,
        observer: NodeId,
        flow: FlowId,
        result_type: ResultType,
        values: Vec<f64>,
    ) {
        self.observer_flow_raw_values
            .entry(observer)
            .or_default()
            .entry(flow.inner())
            .or_default()
            .insert(result_type, values);
    }

    pub fn add_observer_path_result(
        &mut self,
        observer: NodeId,
        path: PathId,
        result_type: ResultType,
        value: f64,
    ) {
        self.observer_path_results
            .entry(observer)
            .or_default()
            .entry(path.inner())
            .or_default()
            .insert(result_type, value);
    }

    pub fn add_observer_active_result(
        &mut self,
        observer: NodeId,
        target: NodeId,
        result_type: ResultType,
        value: f64,
    ) {
        self.observer_active_results
            .entry(observer)
            .or_default()
            .entry(target.inner())
            .or_default()
            .insert(result_type, value);
    }

    pub fn add_observer_active_raw_values(
        &mut self,
        observer: NodeId,
        target: NodeId,
        result_type: ResultType,
        values: Vec<f64>,
    ) {
        self.observer_active_raw_values
            .entry(observer)
            .or_default()
            .entry(target.inner())
            .or_default()
            .insert(result_type, values);
    }

    pub fn add_localization_results(
        &mut self,
        filter: TraceFilter,
        config: ClassificationConfig,
        results: Vec<LocalizationResult>,
        flow_selection: FlowSelection,
    ) {
        self.localization_results.push(LocalizationResultSet {
            filter,
            config,
            results,
            flow_selection,
        });
    }

    /// Renders the output document for one run.
    pub fn render(&self, srs: &ResultSet) -> Result<serde_json::Value, AnalysisError> {
        let mut doc = serde_json::Map::new();
        doc.insert("simId".into(), json!(srs.sim_id()));
        doc.insert("config".into(), srs.config().clone());

        doc.insert("flowPathMap".into(), self.render_flow_path_map(srs)?);
        doc.insert(
            "failedLinks".into(),
            json!(srs.failed_links().values().collect::<Vec<_>>()),
        );
        doc.insert(
            "backboneOverrides".into(),
            json!(srs.backbone_overrides().values().collect::<Vec<_>>()),
        );
        doc.insert("allLinks".into(), json!(srs.all_links()));
        doc.insert("edgeLinks".into(), json!(srs.edge_links()));
        doc.insert("coreLinks".into(), json!(srs.core_links()));
        doc.insert(
            "linkGroundtruthStats".into(),
            json!(srs
                .link_gt_stats()
                .iter()
                .map(|(link, stats)| json!({ "link": link, "stats": stats }))
                .collect::<Vec<_>>()),
        );

        doc.insert(
            "observerFlowResults".into(),
            render_scalars(&self.observer_flow_results, |fid| flow_key(srs, fid)),
        );
        doc.insert(
            "observerFlowResultsRawValues".into(),
            render_raws(&self.observer_flow_raw_values, |fid| flow_key(srs, fid)),
        );
        doc.insert(
            "observerPathResults".into(),
            render_scalars(&self.observer_path_results, |pid| path_key(srs, pid)),
        );
        doc.insert(
            "observerActiveResults".into(),
            render_scalars(&self.observer_active_results, |target| target.to_string()),
        );
        doc.insert(
            "observerActiveResultsRawValues".into(),
            render_raws(&self.observer_active_raw_values, |target| target.to_string()),
        );

        doc.insert(
            "localizationResults".into(),
            self.render_localization_results(srs)?,
        );

        Ok(serde_json::Value::Object(doc))
    }

    fn render_flow_path_map(&self, srs: &ResultSet) -> Result<serde_json::Value, AnalysisError> {
        let mut map = serde_json::Map::new();
        for (&fid, tuple) in srs.observer_flow_info() {
            let path = srs.flow_path(fid)?;
            map.insert(tuple.key(), json!(path));
        }
        Ok(serde_json::Value::Object(map))
    }

    fn render_localization_results(
        &self,
        srs: &ResultSet,
    ) -> Result<serde_json::Value, AnalysisError> {
        let mut out = Vec::new();
        for set in &self.localization_results {
            let config = &set.config;
            let flow_keys: Vec<String> = config
                .flow_ids
                .iter()
                .map(|&fid| flow_key(srs, fid.inner()))
                .collect();
            let selection_mapping: serde_json::Map<String, serde_json::Value> = config
                .flow_selection
                .iter()
                .map(|(oid, flows)| (oid.to_string(), json!(flows)))
                .collect();

            let mut config_json = json!({
                "delayTh": config.delay_th_ms,
                "lossRateTh": config.loss_rate_th,
                "classification_base_id": config.classification_base_id,
                "flowLengthTh": config.flow_length_th,
                "classificationMode": config.mode,
                "observerIds": config.observer_set.observers,
                "flowIds": flow_keys,
            });
            if let Some(metadata) = &config.observer_set.metadata {
                config_json["observerSetMetadata"] = metadata.clone();
            }

            out.push(json!({
                "filter": set.filter,
                "config": config_json,
                "flowSelection": {
                    "selectionStrategy": set.flow_selection.strategy,
                    "params": set.flow_selection.params,
                    "selectionMapping": selection_mapping,
                },
                "results": set.results,
            }));
        }
        Ok(json!(out))
    }
}

fn flow_key(srs: &ResultSet, flow_id: u32) -> String {
    srs.observer_flow_info()
        .get(&FlowId::new(flow_id))
        .map(|t| t.key())
        .unwrap_or_else(|| flow_id.to_string())
}

fn path_key(srs: &ResultSet, path_id: u32) -> String {
    srs.observer_path_info()
        .get(&PathId::new(path_id))
        .map(|p| p.key())
        .unwrap_or_else(|| path_id.to_string())
}

fn render_scalars(
    results: &ScalarResults,
    key_of: impl Fn(u32) -> String,
) -> serde_json::Value {
    let mut observers = serde_json::Map::new();
    for (observer, inner) in results {
        let mut entries = serde_json::Map::new();
        for (&id, values) in inner {
            let mut typed = serde_json::Map::new();
            for (result_type, value) in values {
                typed.insert(result_type.to_string(), json!(value));
            }
            entries.insert(key_of(id), serde_json::Value::Object(typed));
        }
        observers.insert(observer.to_string(), serde_json::Value::Object(entries));
    }
    serde_json::Value::Object(observers)
}

fn render_raws(results: &RawResults, key_of: impl Fn(u32) -> String) -> serde_json::Value {
    let mut observers = serde_json::Map::new();
    for (observer, inner) in results {
        let mut entries = serde_json::Map::new();
        for (&id, values) in inner {
            let mut typed = serde_json::Map::new();
            for (result_type, list) in values {
                typed.insert(result_type.to_string(), json!(list));
            }
            entries.insert(key_of(id), serde_json::Value::Object(typed));
        }
        observers.insert(observer.to_string(), serde_json::Value::Object(entries));
    }
    serde_json::Value::Object(observers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use efmloc_simdata::testing;

    #[test]
    fn rendered_document_carries_the_expected_sections() -> anyhow::Result<()> {
        let mut srs = testing::empty_result_set();
        srs.add_core_link(efmloc_simdata::Link::new(NodeId::new(0), NodeId::new(1)));
        let mut out = OutputAccumulator::new();
        out.add_observer_flow_result(NodeId::new(1), FlowId::new(1), ResultType::QRelLoss, 0.25);

        let doc = out.render(&srs)?;
        for key in [
            "simId",
            "config",
            "flowPathMap",
            "failedLinks",
            "backboneOverrides",
            "allLinks",
            "edgeLinks",
            "coreLinks",
            "linkGroundtruthStats",
            "observerFlowResults",
            "observerFlowResultsRawValues",
            "observerPathResults",
            "observerActiveResults",
            "observerActiveResultsRawValues",
            "localizationResults",
        ] {
            assert!(doc.get(key).is_some(), "missing section {key}");
        }
        assert_eq!(
            doc["observerFlowResults"]["1"]["1"]["q_rel_loss"],
            json!(0.25)
        );
        Ok(())
    }
}
