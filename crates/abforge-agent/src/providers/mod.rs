//! Clients for the experimentation, deployment and pull-request services
//!
//! Each service is a trait so the orchestrator can be handed live HTTP clients
//! or deterministic offline ones. [`ClientSet`] is built once per invocation and
//! passed down; nothing here is global.

pub mod github;
pub mod http;
pub mod offline;
pub mod statsig;
pub mod vercel;

pub use github::GitHubClient;
pub use offline::{OfflineDeployments, OfflineExperiments};
pub use statsig::StatsigClient;
pub use vercel::{preview_url, VercelClient};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use abforge_core::contract::{Condition, ExperimentContract, Tier};
use abforge_core::error::{AbforgeError, Result};
use abforge_core::settings::Settings;
use abforge_core::{DeploymentState, ExperimentStatus};

/// Fixed delay between deployment status checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Experiments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentGroup {
    pub name: String,
    /// Percentage of enrolled traffic
    pub size: f64,
    #[serde(default)]
    pub parameter_values: Map<String, Value>,
}

/// Body of an experiment creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    pub name: String,
    pub description: String,
    pub hypothesis: String,
    pub id_type: String,
    pub groups: Vec<ExperimentGroup>,
    pub allocation: f64,
    #[serde(rename = "targetingGateID", skip_serializing_if = "Option::is_none")]
    pub targeting_gate_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ExperimentConfig {
    pub fn from_contract(contract: &ExperimentContract) -> Self {
        let groups = contract
            .variants
            .values()
            .map(|variant| ExperimentGroup {
                name: variant.name.clone(),
                size: variant.pass_percentage,
                parameter_values: variant.parameters.clone(),
            })
            .collect();

        Self {
            name: contract.experiment_key.clone(),
            description: contract.description.clone(),
            hypothesis: contract.hypothesis.clone(),
            id_type: contract.statsig.id_type.as_str().to_string(),
            groups,
            allocation: contract.allocation,
            targeting_gate_id: contract.statsig.targeting_gate_id.clone(),
            tags: contract.metadata.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub groups: Vec<ExperimentGroup>,
    #[serde(default)]
    pub allocation: Option<f64>,
    #[serde(rename = "targetingGateID", default)]
    pub targeting_gate_id: Option<String>,
}

/// Partial update; absent fields are left untouched remotely
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExperimentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<f64>,
    #[serde(rename = "targetingGateID", skip_serializing_if = "Option::is_none")]
    pub targeting_gate_id: Option<String>,
}

impl ExperimentUpdate {
    pub fn status(status: ExperimentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn targeting_gate(gate_id: impl Into<String>) -> Self {
        Self {
            targeting_gate_id: Some(gate_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateRule {
    pub name: String,
    pub pass_percentage: f64,
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<Tier>,
}

/// Feature gate carrying a contract's targeting rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    pub name: String,
    pub description: String,
    pub rules: Vec<GateRule>,
}

impl GateConfig {
    /// `None` when the contract declares no targeting rules
    pub fn from_contract(contract: &ExperimentContract) -> Option<Self> {
        if contract.targeting_rules.is_empty() {
            return None;
        }
        let rules = contract
            .targeting_rules
            .iter()
            .map(|rule| GateRule {
                name: rule.name.clone(),
                pass_percentage: rule.pass_percentage,
                conditions: rule.conditions.clone(),
                environments: rule.environments.clone(),
            })
            .collect();

        Some(Self {
            name: format!("{}_targeting", contract.experiment_key),
            description: format!("Targeting for experiment {}", contract.experiment_key),
            rules,
        })
    }
}

#[async_trait]
pub trait ExperimentApi: Send + Sync {
    /// Create an experiment, returning its id
    async fn create(&self, config: &ExperimentConfig) -> Result<String>;

    async fn get(&self, id: &str) -> Result<ExperimentDetails>;

    async fn update(&self, id: &str, update: &ExperimentUpdate) -> Result<ExperimentDetails>;

    async fn list(&self) -> Result<Vec<ExperimentDetails>>;

    /// Create a feature gate, returning its id
    async fn create_gate(&self, gate: &GateConfig) -> Result<String>;

    /// Read the experiment, then set it active
    async fn start(&self, id: &str) -> Result<ExperimentDetails> {
        let current = self.get(id).await?;
        tracing::debug!("starting {} (currently {})", id, current.status);
        self.update(id, &ExperimentUpdate::status(ExperimentStatus::Active))
            .await
    }

    /// Read the experiment, then set it stopped
    async fn stop(&self, id: &str) -> Result<ExperimentDetails> {
        let current = self.get(id).await?;
        tracing::debug!("stopping {} (currently {})", id, current.status);
        self.update(id, &ExperimentUpdate::status(ExperimentStatus::Stopped))
            .await
    }
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub url: String,
    pub state: DeploymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// Start a preview deployment of `branch`
    async fn create(&self, branch: &str) -> Result<Deployment>;

    async fn get(&self, id: &str) -> Result<Deployment>;

    async fn list(&self, limit: usize) -> Result<Vec<Deployment>>;

    async fn cancel(&self, id: &str) -> Result<Deployment>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Build log lines
    async fn logs(&self, id: &str) -> Result<Vec<String>>;
}

/// Re-fetch `id` every `interval` until it is READY, fails, or `timeout` passes.
///
/// The last check happens no later than `timeout` after the first one, so the
/// call returns within `timeout` plus one request.
pub async fn poll_deployment(
    api: &dyn DeploymentApi,
    id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<Deployment> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let deployment = api.get(id).await?;
        match deployment.state {
            DeploymentState::Ready => {
                tracing::info!("deployment {} ready at {}", id, deployment.url);
                return Ok(deployment);
            }
            DeploymentState::Error | DeploymentState::Canceled => {
                return Err(AbforgeError::DeploymentFailed {
                    id: id.to_string(),
                    state: deployment.state.to_string(),
                    message: deployment
                        .error_message
                        .unwrap_or_else(|| "no error message reported".to_string()),
                });
            }
            state => tracing::debug!("deployment {} is {}", id, state),
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(AbforgeError::DeploymentTimeout {
                id: id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Create a deployment of `branch`, then poll it
pub async fn wait_for_deployment(
    api: &dyn DeploymentApi,
    branch: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<Deployment> {
    let created = api.create(branch).await?;
    tracing::info!("deployment {} created for {}", created.id, branch);
    if created.state == DeploymentState::Ready {
        return Ok(created);
    }
    poll_deployment(api, &created.id, timeout, interval).await
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub user: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub state: String,
    pub mergeable: Option<bool>,
    pub merged: bool,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

#[async_trait]
pub trait PullRequestApi: Send + Sync {
    async fn create(&self, draft: &PullRequestDraft) -> Result<PullRequest>;

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<()>;

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<()>;

    async fn add_comment(&self, number: u64, body: &str) -> Result<()>;

    /// Open pull request from `head` into `base`, if any
    async fn find_existing(&self, head: &str, base: &str) -> Result<Option<PullRequest>>;

    async fn status(&self, number: u64) -> Result<PullRequestStatus>;

    async fn merge(&self, number: u64, method: MergeMethod) -> Result<()>;

    async fn delete_branch(&self, name: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Client selection
// ---------------------------------------------------------------------------

/// Whether absent credentials may be replaced by offline clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientMode {
    /// Every required credential must be present
    #[default]
    Live,
    /// Substitute offline clients for absent credentials
    AllowOffline,
}

/// The clients one invocation works with
#[derive(Clone)]
pub struct ClientSet {
    pub experiments: Arc<dyn ExperimentApi>,
    pub deployments: Arc<dyn DeploymentApi>,
    /// `None` without GitHub credentials
    pub pull_requests: Option<Arc<dyn PullRequestApi>>,
    /// Project name used for the fallback preview URL
    pub project_name: String,
    pub poll_interval: Duration,
    /// True when the experiment client is offline
    pub offline: bool,
}

impl std::fmt::Debug for ClientSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSet")
            .field("project_name", &self.project_name)
            .field("pull_requests", &self.pull_requests.is_some())
            .field("poll_interval", &self.poll_interval)
            .field("offline", &self.offline)
            .finish()
    }
}

impl ClientSet {
    /// Build clients from settings.
    ///
    /// In [`ClientMode::Live`] a missing experiment-API key is an error naming
    /// the variable. Deployments fall back to offline and pull requests are
    /// disabled when their credentials are absent, in either mode.
    pub fn from_settings(settings: &Settings, mode: ClientMode) -> Result<Self> {
        let (experiments, offline): (Arc<dyn ExperimentApi>, bool) =
            match (settings.require_statsig_console_key(), mode) {
                (Ok(key), _) => (
                    Arc::new(StatsigClient::new(key, &settings.statsig_api_url)),
                    false,
                ),
                (Err(_), ClientMode::AllowOffline) => {
                    tracing::warn!("experiment API key not set, using offline experiments");
                    (Arc::new(OfflineExperiments::new()), true)
                }
                (Err(e), ClientMode::Live) => return Err(e),
            };

        let deployments: Arc<dyn DeploymentApi> = match settings.vercel_credentials() {
            Ok((token, project_id)) => {
                let mut client = VercelClient::new(
                    token,
                    project_id,
                    &settings.vercel_project_name,
                    &settings.vercel_api_url,
                );
                if let Some(team) = &settings.vercel_org_id {
                    client = client.with_team(team);
                }
                if let Some(repo) = &settings.github_repository {
                    client = client.with_repository(repo);
                }
                Arc::new(client)
            }
            Err(missing) => {
                tracing::warn!(
                    "{} not set, deployments use the offline fallback",
                    missing.join(", ")
                );
                Arc::new(OfflineDeployments::new(&settings.vercel_project_name))
            }
        };

        let pull_requests: Option<Arc<dyn PullRequestApi>> = match settings.github_credentials()
        {
            Ok((token, repo)) => Some(Arc::new(GitHubClient::new(
                token,
                repo,
                &settings.github_api_url,
            ))),
            Err(missing) => {
                tracing::debug!("{} not set, pull requests disabled", missing.join(", "));
                None
            }
        };

        Ok(Self {
            experiments,
            deployments,
            pull_requests,
            project_name: settings.vercel_project_name.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            offline,
        })
    }

    /// Fully offline set, used by demos and tests
    pub fn offline(project_name: &str) -> Self {
        Self {
            experiments: Arc::new(OfflineExperiments::new()),
            deployments: Arc::new(OfflineDeployments::new(project_name)),
            pull_requests: None,
            project_name: project_name.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            offline: true,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pull_requests(mut self, client: Arc<dyn PullRequestApi>) -> Self {
        self.pull_requests = Some(client);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abforge_core::settings::{STATSIG_CONSOLE_API_KEY, VERCEL_PROJECT_ID, VERCEL_TOKEN};
    use std::collections::HashMap;
    use std::time::Instant;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn live_mode_names_the_missing_key() {
        let err = ClientSet::from_settings(&settings(&[]), ClientMode::Live).unwrap_err();
        match err {
            AbforgeError::MissingEnv(names) => {
                assert_eq!(names, vec![STATSIG_CONSOLE_API_KEY.to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn allow_offline_substitutes_clients() {
        let clients = ClientSet::from_settings(&settings(&[]), ClientMode::AllowOffline).unwrap();
        assert!(clients.offline);
        assert!(clients.pull_requests.is_none());
    }

    #[test]
    fn live_mode_with_key_degrades_optional_services() {
        let clients = ClientSet::from_settings(
            &settings(&[(STATSIG_CONSOLE_API_KEY, "console-abc"), (VERCEL_TOKEN, "t")]),
            ClientMode::Live,
        )
        .unwrap();
        assert!(!clients.offline);
        assert!(clients.pull_requests.is_none());

        let clients = ClientSet::from_settings(
            &settings(&[
                (STATSIG_CONSOLE_API_KEY, "console-abc"),
                (VERCEL_TOKEN, "t"),
                (VERCEL_PROJECT_ID, "prj"),
            ]),
            ClientMode::Live,
        )
        .unwrap();
        assert_eq!(clients.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    /// Deployment that never leaves BUILDING
    struct StuckDeployments;

    #[async_trait]
    impl DeploymentApi for StuckDeployments {
        async fn create(&self, _branch: &str) -> Result<Deployment> {
            self.get("dpl_stuck").await
        }
        async fn get(&self, id: &str) -> Result<Deployment> {
            Ok(Deployment {
                id: id.to_string(),
                url: "https://stuck.vercel.app".to_string(),
                state: DeploymentState::Building,
                error_message: None,
            })
        }
        async fn list(&self, _limit: usize) -> Result<Vec<Deployment>> {
            Ok(Vec::new())
        }
        async fn cancel(&self, id: &str) -> Result<Deployment> {
            self.get(id).await
        }
        async fn delete(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn logs(&self, _id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn polling_a_stuck_deployment_times_out_within_budget() {
        let timeout = Duration::from_millis(300);
        let interval = Duration::from_millis(100);

        let started = Instant::now();
        let err = poll_deployment(&StuckDeployments, "dpl_stuck", timeout, interval)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, AbforgeError::DeploymentTimeout { .. }));
        assert!(err.to_string().contains("not ready after 300ms"));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + interval + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn polling_reports_failed_builds() {
        let deployments = OfflineDeployments::new("storefront");
        let created = deployments.create("exp/btn").await.unwrap();
        deployments.set_state(&created.id, DeploymentState::Error, Some("build failed"));

        let err = poll_deployment(
            &deployments,
            &created.id,
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        match err {
            AbforgeError::DeploymentFailed { state, message, .. } => {
                assert_eq!(state, "ERROR");
                assert_eq!(message, "build failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
