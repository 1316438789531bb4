//! Read-only checks run before deploying an experiment
//!
//! Every check runs regardless of how the others went. Errors block a
//! deployment, warnings are informational; the report succeeds exactly when
//! there are no errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use abforge_core::contract::{contract_path, load_contract, ExperimentContract};
use abforge_core::settings::Settings;
use abforge_core::branch_for_key;
use abforge_sandbox::CommandRunner;

use crate::git::{GitOps, SyncState};
use crate::patcher::{PatchStrategy, SourcePatcher};
use crate::providers::ExperimentApi;

pub const DEFAULT_BUILD_COMMAND: &str = "npm run build";
pub const DEFAULT_LINT_COMMAND: &str = "npm run lint";
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_LINT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    fn pass(&mut self, name: &str, detail: impl Into<String>) {
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        });
    }

    fn fail(&mut self, name: &str, errors: Vec<String>) {
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed: false,
            detail: errors.join("; "),
        });
        self.errors.extend(errors);
    }
}

/// A local command that must exit zero
#[derive(Debug, Clone)]
pub struct LocalCommand {
    pub name: String,
    pub command_line: String,
    pub timeout: Duration,
}

impl LocalCommand {
    pub fn new(name: &str, command_line: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            command_line: command_line.to_string(),
            timeout,
        }
    }
}

pub struct Preflight {
    root: PathBuf,
    settings: Settings,
    experiments: Option<Arc<dyn ExperimentApi>>,
    git: Arc<dyn GitOps>,
    runner: CommandRunner,
    commands: Vec<LocalCommand>,
    strategy: PatchStrategy,
}

impl Preflight {
    /// `experiments` is `None` when no client could be built
    pub fn new(
        root: impl Into<PathBuf>,
        settings: Settings,
        experiments: Option<Arc<dyn ExperimentApi>>,
        git: Arc<dyn GitOps>,
    ) -> Self {
        let root = root.into();
        Self {
            runner: CommandRunner::new(root.clone()),
            root,
            settings,
            experiments,
            git,
            commands: vec![
                LocalCommand::new("build", DEFAULT_BUILD_COMMAND, DEFAULT_BUILD_TIMEOUT),
                LocalCommand::new("lint", DEFAULT_LINT_COMMAND, DEFAULT_LINT_TIMEOUT),
            ],
            strategy: PatchStrategy::default(),
        }
    }

    /// Locator used for the code target check; match the one `create` will use
    pub fn with_strategy(mut self, strategy: PatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_commands(mut self, commands: Vec<LocalCommand>) -> Self {
        self.commands = commands;
        self
    }

    pub async fn run(&self, key: &str) -> PreflightReport {
        let mut report = PreflightReport::default();

        let contract = self.check_contract(key, &mut report);
        self.check_environment(&mut report);
        self.check_code_targets(contract.as_ref(), &mut report);
        self.check_connectivity(&mut report).await;
        self.check_branch(key, contract.as_ref(), &mut report).await;
        for command in &self.commands {
            self.check_command(command, &mut report).await;
        }

        tracing::info!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "preflight finished for {}",
            key
        );
        report
    }

    fn check_contract(&self, key: &str, report: &mut PreflightReport) -> Option<ExperimentContract> {
        let path = contract_path(&self.root, key);
        if !path.is_file() {
            report.fail(
                "contract",
                vec![format!("contract file {} does not exist", path.display())],
            );
            return None;
        }
        match load_contract(&path) {
            Ok(contract) => {
                report.pass("contract", format!("{} is valid", path.display()));
                Some(contract)
            }
            Err(e) => {
                report.fail("contract", vec![e.to_string()]);
                None
            }
        }
    }

    fn check_environment(&self, report: &mut PreflightReport) {
        let audit = self.settings.audit();
        report.warnings.extend(audit.warnings);
        if audit.errors.is_empty() {
            report.pass("environment", "required variables present and well-formed");
        } else {
            report.fail("environment", audit.errors);
        }
    }

    fn check_code_targets(&self, contract: Option<&ExperimentContract>, report: &mut PreflightReport) {
        let contract = match contract {
            Some(contract) => contract,
            None => {
                report.fail(
                    "code targets",
                    vec!["code targets not checked: no valid contract".to_string()],
                );
                return;
            }
        };

        let patcher = SourcePatcher::new(&self.root).with_strategy(self.strategy);
        let errors: Vec<String> = contract
            .code_changes
            .iter()
            .filter_map(|change| {
                patcher
                    .detect_target(Path::new(&change.file), &change.function)
                    .err()
                    .map(|e| e.to_string())
            })
            .collect();

        if errors.is_empty() {
            report.pass(
                "code targets",
                format!("{} target(s) located", contract.code_changes.len()),
            );
        } else {
            report.fail("code targets", errors);
        }
    }

    async fn check_connectivity(&self, report: &mut PreflightReport) {
        let experiments = match &self.experiments {
            Some(client) => client,
            None => {
                report.fail(
                    "experiment API",
                    vec!["experiment API not checked: no client configured".to_string()],
                );
                return;
            }
        };
        match experiments.list().await {
            Ok(list) => report.pass(
                "experiment API",
                format!("reachable, {} experiment(s)", list.len()),
            ),
            Err(e) => report.fail("experiment API", vec![format!("experiment API: {}", e)]),
        }
    }

    async fn check_branch(
        &self,
        key: &str,
        contract: Option<&ExperimentContract>,
        report: &mut PreflightReport,
    ) {
        let expected = self
            .settings
            .experiment_branch
            .clone()
            .or_else(|| contract.map(|c| c.branch_name().to_string()))
            .unwrap_or_else(|| branch_for_key(key));

        let mut warnings = Vec::new();
        match self.git.current_branch().await {
            Ok(current) if current == expected => {}
            Ok(current) => warnings.push(format!(
                "on branch '{}', expected '{}'",
                current, expected
            )),
            Err(e) => warnings.push(format!("could not read current branch: {}", e)),
        }
        match self.git.has_uncommitted_changes().await {
            Ok(true) => warnings.push("working tree has uncommitted changes".to_string()),
            Ok(false) => {}
            Err(e) => warnings.push(format!("could not read working tree status: {}", e)),
        }
        match self.git.sync_state().await {
            Ok(SyncState::NoUpstream) => warnings.push("branch has no upstream".to_string()),
            Ok(SyncState::Tracking { ahead, behind }) if ahead > 0 || behind > 0 => warnings
                .push(format!(
                    "branch is {} ahead and {} behind its upstream",
                    ahead, behind
                )),
            Ok(_) => {}
            Err(e) => warnings.push(format!("could not compare with upstream: {}", e)),
        }

        // branch state never blocks deployment
        report.checks.push(CheckResult {
            name: "branch".to_string(),
            passed: warnings.is_empty(),
            detail: if warnings.is_empty() {
                format!("on {} and in sync", expected)
            } else {
                warnings.join("; ")
            },
        });
        report.warnings.extend(warnings);
    }

    async fn check_command(&self, command: &LocalCommand, report: &mut PreflightReport) {
        match self
            .runner
            .run_command_line(&command.command_line, Some(command.timeout))
            .await
        {
            Ok(result) if result.success => report.pass(
                &command.name,
                format!("`{}` passed in {}ms", command.command_line, result.duration_ms),
            ),
            Ok(result) if result.timed_out => report.fail(
                &command.name,
                vec![format!(
                    "`{}` timed out after {}s",
                    command.command_line,
                    command.timeout.as_secs_f64()
                )],
            ),
            Ok(result) => report.fail(
                &command.name,
                vec![format!(
                    "`{}` exited with {}: {}",
                    command.command_line,
                    result.exit_code,
                    result.summary()
                )],
            ),
            Err(e) => report.fail(
                &command.name,
                vec![format!("`{}` could not run: {}", command.command_line, e)],
            ),
        }
    }
}
