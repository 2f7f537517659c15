use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use efmloc_analysis::{run_analyses, OutputAccumulator, WarningCounter};
use efmloc_frontend::{find_file_groups, load_configs, split_prefix, FrontendError, RunStore};

/// Offline analysis of EFM simulation traces: per-flow metrics and failed
/// link localization.
#[derive(Debug, Parser)]
struct Cli {
    /// File prefix selecting the trace documents to analyze. May carry a
    /// subdirectory (e.g. `download/eq-10-5MB`), which is appended to both
    /// the input and output base directories.
    prefix: String,

    /// Analysis configuration document.
    #[arg(short = 'c', long, default_value = "./data/analysis-config.json")]
    config: PathBuf,

    /// Directory the simulation wrote its trace documents to.
    #[arg(short = 's', long, default_value = "../ns-3-dev-fork/output/")]
    sim_output_dir: PathBuf,

    /// Directory to write the analysis results to.
    #[arg(short = 'a', long, default_value = "./data/analysis-results/")]
    analysis_output_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    for dir in [&cli.sim_output_dir, &cli.analysis_output_dir] {
        if !dir.exists() {
            return Err(FrontendError::MissingPath(dir.clone()).into());
        }
    }

    let (path_prefix, file_prefix) = split_prefix(&cli.prefix)?;
    let input_dir = match path_prefix {
        Some(sub) => cli.sim_output_dir.join(sub),
        None => cli.sim_output_dir.clone(),
    };
    let output_dir = match path_prefix {
        Some(sub) => cli.analysis_output_dir.join(sub),
        None => cli.analysis_output_dir.clone(),
    };

    let groups = find_file_groups(&input_dir, file_prefix)?;
    let configs = load_configs(&cli.config)
        .with_context(|| format!("loading analysis config {}", cli.config.display()))?;

    let mut store = RunStore::new();
    for (stem, files) in &groups {
        log::info!("importing {} file(s) for {stem}", files.len());
        let mut masters = 0usize;
        for file in files {
            let created = store
                .import_file(file)
                .with_context(|| format!("importing {}", file.display()))?;
            if created {
                masters += 1;
            }
        }
        if masters != 1 {
            return Err(FrontendError::NotExactlyOneMaster(stem.clone()).into());
        }
        let sim_id = store
            .sim_ids()
            .next()
            .cloned()
            .ok_or_else(|| FrontendError::NotExactlyOneMaster(stem.clone()))?;
        let srs = store
            .result_set(&sim_id)
            .ok_or_else(|| FrontendError::NotExactlyOneMaster(stem.clone()))?;

        log::info!("analyzing {sim_id}");
        let warn = WarningCounter::new();
        let mut out = OutputAccumulator::new();
        run_analyses(srs, &configs, &mut out, &warn)?;
        warn.log_summary();

        let document = out.render(srs)?;
        let output_path = output_dir.join(format!("analysis-{stem}.json"));
        std::fs::create_dir_all(&output_dir)?;
        std::fs::write(&output_path, serde_json::to_vec(&document)?)?;
        log::info!("wrote {}", output_path.display());

        store.clear();
    }

    Ok(())
}
