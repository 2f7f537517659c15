//! End-to-end: import a trace document, run an analysis configuration, and
//! check the rendered output document.

use serde_json::json;

use efmloc_analysis::{run_analyses, OutputAccumulator, WarningCounter};
use efmloc_frontend::{parse_configs, RunStore};

/// A three-node chain 0 - 1 - 2 with observers everywhere, one flow pair,
/// and 20% sequence loss on the forward flow.
fn trace_document() -> serde_json::Value {
    let mut traces = Vec::new();
    for (node, fwd_begin, rev_begin) in [(0u32, 0.10, 0.30), (1, 0.20, 0.20), (2, 0.30, 0.10)] {
        let mut events = vec![
            json!({"name": "efm_observer:flow_begin", "time": fwd_begin,
                   "group_id": {"flow_id": 1}, "data": {}}),
            json!({"name": "efm_observer:flow_begin", "time": rev_begin,
                   "group_id": {"flow_id": 2}, "data": {}}),
        ];
        if node == 2 {
            events.push(json!({"name": "efm_observer:seq_loss", "time": 1.0,
                               "group_id": {"flow_id": 1},
                               "data": {"pkt_count": 80, "loss": 20}}));
        }
        traces.push(json!({
            "vantage_point": {"name": format!("{node}/monitor"), "type": "network"},
            "events": events,
        }));
    }

    let flow_stats = json!({"total_packets": 1000, "total_efm_packets": 1000});
    json!({
        "title": "chain-run",
        "summary": {
            "client_stats": {},
            "server_stats": {},
            "observer_stats": {
                "0": {"1": flow_stats, "2": flow_stats},
                "1": {"1": flow_stats, "2": flow_stats},
                "2": {"1": flow_stats, "2": flow_stats}
            },
            "config": {"scenario": "chain"},
            "failed_links": [{"nodeA": 0, "nodeB": 1, "lossRate": 0.2, "delayMs": 0}],
            "host_connections": {},
            "observer_flows": {
                "1": {"src_node_id": 0, "src_port": 1000,
                      "dst_node_id": 2, "dst_port": 2000, "prot": 17},
                "2": {"src_node_id": 2, "src_port": 2000,
                      "dst_node_id": 0, "dst_port": 1000, "prot": 17}
            },
            "link_sets": {
                "core_links": [
                    {"src": 0, "dst": 1}, {"src": 1, "dst": 2},
                    {"src": 2, "dst": 1}, {"src": 1, "dst": 0}
                ],
                "edge_links": []
            }
        },
        "traces": traces,
    })
}

const ANALYSIS_CONFIG: &str = r#"[{
    "storeMeasurements": true,
    "performLocalization": true,
    "efmBitSets": [["SEQ"]],
    "classificationModes": ["STATIC"],
    "flowLengthTh": 0,
    "observerSets": [[2]],
    "lossRateTh": 0.1,
    "delayThMs": 10,
    "localizationMethods": {"DETECTION": {}, "POSSIBLE": {}},
    "flowSelectionStrategies": {"ALL": {}},
    "simFilter": {"lBitTriggeredMonitoring": false, "removeLastXSpinTransients": 0},
    "time_filter_ms": 1000000,
    "output_raw_values": false
}]"#;

#[test]
fn chain_run_localizes_the_forward_links() -> anyhow::Result<()> {
    let mut store = RunStore::new();
    let document = serde_json::from_value(trace_document())?;
    assert!(store.import_document(document)?);

    let configs = parse_configs(ANALYSIS_CONFIG)?;
    let srs = store.result_set("chain-run").expect("run imported");

    let warn = WarningCounter::new();
    let mut out = OutputAccumulator::new();
    run_analyses(srs, &configs, &mut out, &warn)?;
    let doc = out.render(srs)?;

    assert_eq!(doc["simId"], json!("chain-run"));
    assert_eq!(doc["config"]["scenario"], json!("chain"));

    // The stored per-observer metric survives into the output.
    let seq = &doc["observerFlowResults"]["2"]["0:1000:2:2000:17"]["seq_rel_loss"];
    assert!((seq.as_f64().unwrap() - 0.2).abs() < 1e-12);

    // DETECTION over SEQ at the last observer blames the upstream chain.
    let results = doc["localizationResults"][0]["results"]
        .as_array()
        .expect("localization results present");
    let detection = results
        .iter()
        .find(|r| r["method"] == json!("DETECTION"))
        .expect("detection result present");
    let failed = detection["failedLinks"].as_array().unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&json!({"src": 0, "dst": 1})));
    assert!(failed.contains(&json!({"src": 1, "dst": 2})));

    let possible = results
        .iter()
        .find(|r| r["method"] == json!("POSSIBLE"))
        .expect("possible result present");
    assert_eq!(possible["failedLinks"], detection["failedLinks"]);

    Ok(())
}

#[test]
fn config_reports_the_effective_selection() -> anyhow::Result<()> {
    let mut store = RunStore::new();
    let document = serde_json::from_value(trace_document())?;
    store.import_document(document)?;

    let configs = parse_configs(ANALYSIS_CONFIG)?;
    let srs = store.result_set("chain-run").unwrap();

    let warn = WarningCounter::new();
    let mut out = OutputAccumulator::new();
    run_analyses(srs, &configs, &mut out, &warn)?;
    let doc = out.render(srs)?;

    let config = &doc["localizationResults"][0]["config"];
    assert_eq!(config["lossRateTh"], json!(0.1));
    assert_eq!(config["classificationMode"], json!("STATIC"));
    assert_eq!(config["observerIds"], json!([2]));

    let selection = &doc["localizationResults"][0]["flowSelection"];
    assert_eq!(selection["selectionStrategy"], json!("ALL"));
    assert_eq!(selection["selectionMapping"]["2"], json!([1, 2]));
    Ok(())
}
