//! Full pipeline command.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use folio_pipeline::{ConcurrencyGroups, Pipeline, Trigger};

use crate::config::FolioConfig;
use crate::Event;

/// Run the pipeline for one trigger event.
pub async fn run(
    config_path: &Path,
    root: PathBuf,
    event: Event,
    branch: Option<String>,
    number: Option<u64>,
) -> Result<()> {
    let trigger = trigger(event, branch, number)?;
    let config = FolioConfig::load(config_path)?;

    let pipeline = Pipeline::new(
        config.pipeline_config(&root),
        config.build_stage(&root, None),
        config.deployer(&root)?,
        ConcurrencyGroups::new(),
    );

    let mut report = pipeline.run(trigger).await;

    if report.is_skipped() {
        tracing::info!("Nothing to do for {}", report.trigger);
        return Ok(());
    }

    if let Some(err) = report.error.take() {
        return Err(err).with_context(|| format!("Run {} ended {}", report.id, report.state()));
    }

    if let Some(build) = &report.build {
        tracing::info!(
            "Built {} pages with {} at {}",
            build.pages,
            build.pinned.key,
            build.pinned.version
        );
    }
    if let Some(deployment) = &report.deployment {
        println!("{}", deployment.url);
    }

    Ok(())
}

fn trigger(event: Event, branch: Option<String>, number: Option<u64>) -> Result<Trigger> {
    match event {
        Event::Push => match branch {
            Some(branch) => Ok(Trigger::push(branch)),
            None => bail!("--branch is required for push events"),
        },
        Event::PullRequest => match number {
            Some(number) => Ok(Trigger::pull_request(number)),
            None => bail!("--number is required for pull-request events"),
        },
    }
}
