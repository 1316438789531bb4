//! Experiment pipeline
//!
//! Runs one contract through a fixed sequence of stages:
//!
//! ```text
//! LoadContract
//!   -> CreateOrCheckoutBranch
//!   -> ApplyCodeChanges
//!   -> CommitAndPush
//!   -> AwaitDeployment        (optional, never fatal)
//!   -> CreateRemoteExperiment
//!   -> ConfigureTargeting
//!   -> CreatePullRequest      (optional, never fatal)
//!   -> AutoStart              (optional)
//!   -> Done
//! ```
//!
//! A fatal stage aborts the run with [`PipelineAborted`], which carries the
//! report of everything that happened up to that point. Patches already written
//! stay on disk; callers that asked for backups can restore them with
//! [`restore_code_changes`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use abforge_core::contract::{load_contract, ExperimentContract, Platform};
use abforge_core::error::{AbforgeError, Result};
use abforge_core::CodeModificationResult;

use crate::git::GitOps;
use crate::patcher::{self, PatchStrategy, SourcePatcher};
use crate::providers::{
    preview_url, wait_for_deployment, ClientSet, ExperimentConfig, ExperimentUpdate, GateConfig,
    PullRequest, PullRequestApi, PullRequestDraft,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    LoadContract,
    CreateOrCheckoutBranch,
    ApplyCodeChanges,
    CommitAndPush,
    AwaitDeployment,
    CreateRemoteExperiment,
    ConfigureTargeting,
    CreatePullRequest,
    AutoStart,
    Done,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::LoadContract => "load contract",
            Self::CreateOrCheckoutBranch => "create or check out branch",
            Self::ApplyCodeChanges => "apply code changes",
            Self::CommitAndPush => "commit and push",
            Self::AwaitDeployment => "await deployment",
            Self::CreateRemoteExperiment => "create remote experiment",
            Self::ConfigureTargeting => "configure targeting",
            Self::CreatePullRequest => "create pull request",
            Self::AutoStart => "auto-start experiment",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed(String),
    Skipped(String),
    /// Non-fatal failure, the pipeline continued
    Warned(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// What one pipeline run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub experiment_key: String,
    pub branch: String,
    pub stages: Vec<StageReport>,
    pub modifications: Vec<CodeModificationResult>,
    pub preview_url: Option<String>,
    pub experiment_id: Option<String>,
    pub pull_request: Option<PullRequest>,
}

impl PipelineReport {
    pub fn success(&self) -> bool {
        !self
            .stages
            .iter()
            .any(|s| matches!(s.outcome, StageOutcome::Failed(_)))
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| &s.outcome)
    }

    fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        match &outcome {
            StageOutcome::Completed(detail) => tracing::info!("{}: {}", stage, detail),
            StageOutcome::Skipped(detail) => tracing::debug!("{} skipped: {}", stage, detail),
            StageOutcome::Warned(detail) => tracing::warn!("{}: {}", stage, detail),
            StageOutcome::Failed(detail) => tracing::error!("{} failed: {}", stage, detail),
        }
        self.stages.push(StageReport { stage, outcome });
    }
}

/// A fatal stage failure
#[derive(Debug, Error)]
#[error("pipeline aborted at {stage}: {source}")]
pub struct PipelineAborted {
    pub stage: Stage,
    pub report: Box<PipelineReport>,
    #[source]
    pub source: AbforgeError,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Write `<file>.rollback` copies before patching
    pub backup: bool,
    pub strategy: PatchStrategy,
    /// Overrides the module the injected import reads from
    pub module_path: Option<String>,
}

pub struct Orchestrator {
    root: PathBuf,
    clients: ClientSet,
    git: Arc<dyn GitOps>,
    options: PipelineOptions,
}

type StageResult<T> = std::result::Result<T, PipelineAborted>;

impl Orchestrator {
    pub fn new(root: impl Into<PathBuf>, clients: ClientSet, git: Arc<dyn GitOps>) -> Self {
        Self {
            root: root.into(),
            clients,
            git,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    fn patcher(&self) -> SourcePatcher {
        let patcher = SourcePatcher::new(&self.root).with_strategy(self.options.strategy);
        match &self.options.module_path {
            Some(module) => patcher.with_module_path(module),
            None => patcher,
        }
    }

    /// Run every stage for the contract at `contract_path`
    pub async fn run(&self, contract_path: &Path) -> StageResult<PipelineReport> {
        let mut report = PipelineReport::default();

        let contract = abort_on(&mut report, Stage::LoadContract, load_contract(contract_path))?;
        report.experiment_key = contract.experiment_key.clone();
        report.branch = contract.branch_name().to_string();
        report.record(
            Stage::LoadContract,
            StageOutcome::Completed(format!(
                "{} with {} variant(s) and {} code change(s)",
                contract.experiment_key,
                contract.variants.len(),
                contract.code_changes.len()
            )),
        );

        let detail = abort_on(
            &mut report,
            Stage::CreateOrCheckoutBranch,
            self.prepare_branch(&contract).await,
        )?;
        report.record(Stage::CreateOrCheckoutBranch, StageOutcome::Completed(detail));

        self.apply_code_changes(&contract, &mut report)?;

        abort_on(
            &mut report,
            Stage::CommitAndPush,
            self.commit_and_push(&contract).await,
        )?;
        report.record(
            Stage::CommitAndPush,
            StageOutcome::Completed(format!("pushed {}", contract.branch_name())),
        );

        self.await_deployment(&contract, &mut report).await;

        let config = ExperimentConfig::from_contract(&contract);
        let experiment_id = abort_on(
            &mut report,
            Stage::CreateRemoteExperiment,
            self.clients.experiments.create(&config).await,
        )?;
        report.experiment_id = Some(experiment_id.clone());
        report.record(
            Stage::CreateRemoteExperiment,
            StageOutcome::Completed(format!("created experiment {}", experiment_id)),
        );

        let targeting = abort_on(
            &mut report,
            Stage::ConfigureTargeting,
            self.configure_targeting(&contract, &experiment_id).await,
        )?;
        report.record(Stage::ConfigureTargeting, targeting);

        let pr_outcome = self.create_pull_request(&contract, &mut report).await;
        report.record(Stage::CreatePullRequest, pr_outcome);

        if contract.statsig.auto_start {
            let started = abort_on(
                &mut report,
                Stage::AutoStart,
                self.clients.experiments.start(&experiment_id).await,
            )?;
            report.record(
                Stage::AutoStart,
                StageOutcome::Completed(format!("experiment is {}", started.status)),
            );
        } else {
            report.record(
                Stage::AutoStart,
                StageOutcome::Skipped("statsig.autoStart is false".to_string()),
            );
        }

        report.record(Stage::Done, StageOutcome::Completed(contract.experiment_key.clone()));
        Ok(report)
    }

    async fn prepare_branch(&self, contract: &ExperimentContract) -> Result<String> {
        let branch = contract.branch_name();
        if self.git.branch_exists(branch).await? {
            self.git.checkout(branch).await?;
            return Ok(format!("checked out existing {}", branch));
        }
        let base = &contract.branch_config.base_branch;
        self.git.checkout(base).await?;
        self.git.pull(base).await?;
        self.git.create_branch(branch).await?;
        Ok(format!("created {} from {}", branch, base))
    }

    fn apply_code_changes(
        &self,
        contract: &ExperimentContract,
        report: &mut PipelineReport,
    ) -> StageResult<()> {
        let patcher = self.patcher();

        if self.options.backup {
            for change in &contract.code_changes {
                let path = patcher.resolve(Path::new(&change.file));
                if !path.is_file() {
                    continue;
                }
                if let Err(e) = patcher::create_rollback(&path) {
                    return Err(abort(report, Stage::ApplyCodeChanges, e.into()));
                }
            }
        }

        let results = patcher.apply_all(&contract.experiment_key, &contract.code_changes);
        let failures: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .flat_map(|r| r.errors.iter().cloned())
            .collect();
        let total = results.len();
        report.modifications = results;

        if !failures.is_empty() {
            return Err(abort(
                report,
                Stage::ApplyCodeChanges,
                AbforgeError::CodeChanges { total, failures },
            ));
        }

        let changes: usize = report.modifications.iter().map(|r| r.changes.len()).sum();
        report.record(
            Stage::ApplyCodeChanges,
            StageOutcome::Completed(format!("{} file(s) patched, {} edit(s)", total, changes)),
        );
        Ok(())
    }

    async fn commit_and_push(&self, contract: &ExperimentContract) -> Result<()> {
        self.git.stage_all().await?;
        self.git.commit(&commit_message(contract)).await?;
        self.git.push_upstream(contract.branch_name()).await
    }

    async fn await_deployment(&self, contract: &ExperimentContract, report: &mut PipelineReport) {
        let branch = contract.branch_name();
        let fallback = preview_url(&self.clients.project_name, branch);

        if !contract.deployment.wait_for_deployment {
            report.preview_url = Some(fallback.clone());
            report.record(
                Stage::AwaitDeployment,
                StageOutcome::Skipped(format!("not waiting, preview expected at {}", fallback)),
            );
            return;
        }
        if contract.deployment.platform != Platform::Vercel {
            report.preview_url = Some(fallback.clone());
            report.record(
                Stage::AwaitDeployment,
                StageOutcome::Skipped(format!(
                    "{:?} deployments are not tracked",
                    contract.deployment.platform
                )),
            );
            return;
        }

        let timeout = Duration::from_millis(contract.deployment.timeout);
        match wait_for_deployment(
            self.clients.deployments.as_ref(),
            branch,
            timeout,
            self.clients.poll_interval,
        )
        .await
        {
            Ok(deployment) => {
                report.record(
                    Stage::AwaitDeployment,
                    StageOutcome::Completed(format!("{} ready at {}", deployment.id, deployment.url)),
                );
                report.preview_url = Some(deployment.url);
            }
            Err(e) => {
                report.record(
                    Stage::AwaitDeployment,
                    StageOutcome::Warned(format!("{}; using {}", e, fallback)),
                );
                report.preview_url = Some(fallback);
            }
        }
    }

    async fn configure_targeting(
        &self,
        contract: &ExperimentContract,
        experiment_id: &str,
    ) -> Result<StageOutcome> {
        if let Some(gate_id) = &contract.statsig.targeting_gate_id {
            return Ok(StageOutcome::Completed(format!("targeting gate {}", gate_id)));
        }
        let gate = match GateConfig::from_contract(contract) {
            Some(gate) => gate,
            None => return Ok(StageOutcome::Skipped("no targeting rules".to_string())),
        };
        let gate_id = self.clients.experiments.create_gate(&gate).await?;
        self.clients
            .experiments
            .update(experiment_id, &ExperimentUpdate::targeting_gate(&gate_id))
            .await?;
        Ok(StageOutcome::Completed(format!(
            "gate {} with {} rule(s)",
            gate_id,
            gate.rules.len()
        )))
    }

    async fn create_pull_request(
        &self,
        contract: &ExperimentContract,
        report: &mut PipelineReport,
    ) -> StageOutcome {
        if !contract.wants_pull_request() {
            return StageOutcome::Skipped("pull request not requested".to_string());
        }
        let client = match &self.clients.pull_requests {
            Some(client) => client,
            None => {
                return StageOutcome::Warned("GitHub credentials not set".to_string());
            }
        };

        let preview = report.preview_url.clone();
        let result = open_pull_request(client.as_ref(), contract, preview.as_deref()).await;

        match result {
            Ok(pr) => {
                let outcome = StageOutcome::Completed(format!("#{} {}", pr.number, pr.url));
                report.pull_request = Some(pr);
                outcome
            }
            Err(e) => StageOutcome::Warned(e.to_string()),
        }
    }
}

fn abort(report: &mut PipelineReport, stage: Stage, source: AbforgeError) -> PipelineAborted {
    report.record(stage, StageOutcome::Failed(source.to_string()));
    PipelineAborted {
        stage,
        report: Box::new(report.clone()),
        source,
    }
}

fn abort_on<T>(report: &mut PipelineReport, stage: Stage, result: Result<T>) -> StageResult<T> {
    result.map_err(|e| abort(report, stage, e))
}

/// Commit message embedding the experiment's metadata
pub fn commit_message(contract: &ExperimentContract) -> String {
    let variants: Vec<String> = contract
        .variants
        .values()
        .map(|v| format!("{} ({}%)", v.name, v.pass_percentage))
        .collect();
    let files: Vec<&str> = contract
        .code_changes
        .iter()
        .map(|c| c.file.as_str())
        .collect();

    let mut message = format!("experiment({}): {}\n\n", contract.experiment_key, contract.name);
    if !contract.hypothesis.is_empty() {
        message.push_str(&format!("Hypothesis: {}\n", contract.hypothesis));
    }
    message.push_str(&format!("Variants: {}\n", variants.join(", ")));
    message.push_str(&format!("Files: {}\n", files.join(", ")));
    message.push_str(&format!("Allocation: {}%\n", contract.allocation));
    if let Some(author) = &contract.metadata.author {
        message.push_str(&format!("Author: {}\n", author));
    }
    message.push_str(&format!("Generated: {}\n", Utc::now().to_rfc3339()));
    message
}

async fn open_pull_request(
    client: &dyn PullRequestApi,
    contract: &ExperimentContract,
    preview: Option<&str>,
) -> Result<PullRequest> {
    let settings = contract.pull_request.clone().unwrap_or_default();
    let head = contract.branch_name();
    let base = &contract.branch_config.target_branch;

    let pr = match client.find_existing(head, base).await? {
        Some(existing) => existing,
        None => {
            client
                .create(&PullRequestDraft {
                    title: format!("Experiment: {}", contract.name),
                    body: pull_request_body(contract, preview),
                    head: head.to_string(),
                    base: base.to_string(),
                    draft: settings.draft,
                })
                .await?
        }
    };
    client.request_reviewers(pr.number, &settings.reviewers).await?;
    client.add_labels(pr.number, &settings.labels).await?;
    if let Some(url) = preview {
        client
            .add_comment(pr.number, &format!("Preview deployment: {}", url))
            .await?;
    }
    Ok(pr)
}

fn pull_request_body(contract: &ExperimentContract, preview: Option<&str>) -> String {
    let mut body = format!("## Experiment `{}`\n\n", contract.experiment_key);
    if !contract.description.is_empty() {
        body.push_str(&format!("{}\n\n", contract.description));
    }
    if !contract.hypothesis.is_empty() {
        body.push_str(&format!("**Hypothesis:** {}\n\n", contract.hypothesis));
    }
    body.push_str("| Variant | Traffic |\n|---|---|\n");
    for variant in contract.variants.values() {
        body.push_str(&format!("| {} | {}% |\n", variant.name, variant.pass_percentage));
    }
    if let Some(url) = preview {
        body.push_str(&format!("\nPreview: {}\n", url));
    }
    body
}

/// Restore every code-change file of `contract` from its rollback copy
pub fn restore_code_changes(root: &Path, contract: &ExperimentContract) -> Vec<CodeModificationResult> {
    let patcher = SourcePatcher::new(root);
    contract
        .code_changes
        .iter()
        .map(|change| {
            let path = patcher.resolve(Path::new(&change.file));
            match patcher::restore_from_rollback(&path) {
                Ok(()) => CodeModificationResult::applied(
                    &path,
                    vec!["restored from rollback copy".to_string()],
                ),
                Err(e) => CodeModificationResult::failed(&path, e.to_string()),
            }
        })
        .collect()
}
