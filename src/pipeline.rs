use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::classify::classify_tree;
use crate::config::PipelineConfig;
use crate::dispatch::Dispatcher;
use crate::executor::Executor;
use crate::extractors::Extractors;
use crate::link::{link_with, LinkConfig, LinkReport};
use crate::stats::PipelineStats;
use crate::storage::{LocalStorage, Storage};

/// What a finished run reports back to its caller.
#[derive(Debug)]
pub struct PipelineSummary {
    pub link: LinkReport,
    pub stats: Arc<PipelineStats>,
    pub duration_secs: f64,
}

/// Classify, extract, then link, with the built-in extractors on local storage.
pub async fn run_pipeline(config: PipelineConfig) -> Result<PipelineSummary> {
    run_pipeline_with(config, Extractors::builtin(), Arc::new(LocalStorage)).await
}

pub async fn run_pipeline_with(
    config: PipelineConfig,
    extractors: Extractors,
    storage: Arc<dyn Storage>,
) -> Result<PipelineSummary> {
    let start = Instant::now();
    let stats = Arc::new(PipelineStats::new());

    let classification = classify_tree(&config.input_root, &config.user_metadata_filename)
        .context("Classification failed")?;
    stats.add_classified(classification.files.len() as u64);

    fs::create_dir_all(&config.output_root)
        .with_context(|| format!("Failed to create output directory: {:?}", config.output_root))?;

    let link_config = LinkConfig::from_pipeline(&config);
    let dispatcher = Arc::new(Dispatcher::new(
        config,
        extractors,
        Arc::clone(&storage),
        Arc::clone(&stats),
    ));
    let outcomes = Executor::new(dispatcher).run(&classification).await;
    info!(
        outcomes = outcomes.len(),
        extracted = stats.extracted(),
        failed = stats.failed(),
        "Extraction complete"
    );

    let link = link_with(&outcomes, &link_config, storage.as_ref()).context("Linking failed")?;
    stats.add_datasets_linked(link.datasets_linked as u64);
    stats.add_children_linked(link.children_linked as u64);

    Ok(PipelineSummary {
        link,
        stats,
        duration_secs: start.elapsed().as_secs_f64(),
    })
}
