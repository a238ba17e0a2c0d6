//! Release pipeline orchestration and run reporting.

use chrono::{DateTime, Utc};
use relbuild_core::{PipelineConfig, PipelineError, PublishedArtifact, Stage};
use serde::{Serialize, Serializer};
use std::future::Future;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::stage::StageSet;

/// How a single stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One entry of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    fn succeeded(stage: Stage, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            duration_ms,
            error: None,
        }
    }

    fn failed(stage: Stage, duration_ms: u64, error: &PipelineError) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            duration_ms,
            error: Some(error.to_string()),
        }
    }

    fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub app_name: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Stages that were reached, in order. A stage after a failure is absent.
    pub stages: Vec<StageRecord>,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: Result<PublishedArtifact, PipelineError>,
}

impl PipelineRun {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// 0 on success, the failing stage's code otherwise.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }

    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Number of stages that ran and succeeded.
    pub fn passed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| r.status == StageStatus::Succeeded)
            .count()
    }

    pub fn into_result(self) -> Result<PublishedArtifact, PipelineError> {
        self.outcome
    }

    /// Write the run report as pretty JSON.
    pub fn write_report(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeView<'a> {
    Succeeded {
        artifact: &'a PublishedArtifact,
    },
    Failed {
        stage: Stage,
        exit_code: i32,
        message: String,
        diagnostic: &'a str,
    },
}

fn serialize_outcome<S: Serializer>(
    outcome: &Result<PublishedArtifact, PipelineError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let view = match outcome {
        Ok(artifact) => OutcomeView::Succeeded { artifact },
        Err(e) => OutcomeView::Failed {
            stage: e.stage(),
            exit_code: e.exit_code(),
            message: e.to_string(),
            diagnostic: e.diagnostic(),
        },
    };
    view.serialize(serializer)
}

/// Linear provision -> compile -> strip -> publish pipeline for one target.
///
/// The first failing stage aborts the run; nothing already done is rolled
/// back.
pub struct ReleasePipeline {
    config: PipelineConfig,
    stages: StageSet,
}

impl ReleasePipeline {
    pub fn new(config: PipelineConfig, stages: StageSet) -> Self {
        Self { config, stages }
    }

    /// Pipeline wired with the production stages.
    pub fn from_config(config: PipelineConfig) -> Self {
        let stages = StageSet::from_config(&config);
        Self::new(config, stages)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute all stages and return the run record.
    pub async fn run(&self) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let span = info_span!("pipeline", run_id = %run_id, target = %self.config.target);

        let mut records = Vec::with_capacity(Stage::ORDER.len());
        let outcome = async {
            info!(app = %self.config.app_name, "Starting release pipeline");
            let outcome = self.execute(&mut records).await;
            match &outcome {
                Ok(published) => {
                    info!(path = %published.path.display(), "Release pipeline completed")
                }
                Err(e) => error!(stage = %e.stage(), "Release pipeline aborted"),
            }
            outcome
        }
        .instrument(span)
        .await;

        PipelineRun {
            run_id,
            app_name: self.config.app_name.clone(),
            target: self.config.target.triple().to_string(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            stages: records,
            outcome,
        }
    }

    async fn execute(
        &self,
        records: &mut Vec<StageRecord>,
    ) -> Result<PublishedArtifact, PipelineError> {
        let config = &self.config;

        if config.skip_provision {
            info!(stage = %Stage::Provision, "Skipping stage: host is pre-provisioned");
            records.push(StageRecord::skipped(Stage::Provision));
        } else {
            run_stage(
                records,
                Stage::Provision,
                self.stages.provisioner.provision(&config.dependencies),
            )
            .await?;
        }

        let compiled = run_stage(
            records,
            Stage::Compile,
            self.stages
                .compiler
                .compile(&config.target, &config.profile, &config.source_root),
        )
        .await?;

        let processed = if config.skip_strip {
            warn!(
                stage = %Stage::Strip,
                path = %compiled.path.display(),
                "Skipping stage: publishing unstripped binary"
            );
            records.push(StageRecord::skipped(Stage::Strip));
            compiled
        } else {
            run_stage(
                records,
                Stage::Strip,
                self.stages.post_processor.strip(compiled),
            )
            .await?
        };

        let mut published = run_stage(
            records,
            Stage::Publish,
            self.stages.publisher.publish(
                processed,
                &config.output_dir,
                &config.app_name,
                &config.target,
            ),
        )
        .await?;
        published.stripped = !config.skip_strip;

        Ok(published)
    }
}

/// Await one stage, record its outcome, and convert its error.
async fn run_stage<T, E, F>(
    records: &mut Vec<StageRecord>,
    stage: Stage,
    future: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<PipelineError>,
{
    info!(stage = %stage, "Executing stage");
    let start = Instant::now();
    let result = future.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(value) => {
            info!(stage = %stage, duration_ms, "Stage succeeded");
            records.push(StageRecord::succeeded(stage, duration_ms));
            Ok(value)
        }
        Err(e) => {
            let err: PipelineError = e.into();
            error!(stage = %stage, duration_ms, error = %err, "Stage failed");
            records.push(StageRecord::failed(stage, duration_ms, &err));
            Err(err)
        }
    }
}
