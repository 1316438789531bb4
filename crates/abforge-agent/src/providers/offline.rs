//! In-memory stand-ins for the live clients
//!
//! Used when credentials are absent and the caller allowed it, and by tests.
//! Behaviour is deterministic: ids are sequential and deployments are READY
//! at their branch preview URL as soon as they are created.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use abforge_core::error::{AbforgeError, Result};
use abforge_core::{DeploymentState, ExperimentStatus};

use super::vercel::preview_url;
use super::{
    Deployment, DeploymentApi, ExperimentApi, ExperimentConfig, ExperimentDetails,
    ExperimentUpdate, GateConfig,
};

const EXPERIMENTS: &str = "statsig (offline)";

#[derive(Debug, Default)]
struct ExperimentState {
    experiments: BTreeMap<String, ExperimentDetails>,
    gates: BTreeMap<String, GateConfig>,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct OfflineExperiments {
    state: Mutex<ExperimentState>,
}

impl OfflineExperiments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations received so far, as `"<op> <id>"`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn gate(&self, id: &str) -> Option<GateConfig> {
        self.state.lock().gates.get(id).cloned()
    }

    fn not_found(id: &str) -> AbforgeError {
        AbforgeError::NotFound {
            kind: "experiment".to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl ExperimentApi for OfflineExperiments {
    async fn create(&self, config: &ExperimentConfig) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(format!("create {}", config.name));
        if state.experiments.contains_key(&config.name) {
            return Err(AbforgeError::remote(
                EXPERIMENTS,
                409,
                format!("experiment {} already exists", config.name),
            ));
        }
        let details = ExperimentDetails {
            id: config.name.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            status: ExperimentStatus::Setup,
            groups: config.groups.clone(),
            allocation: Some(config.allocation),
            targeting_gate_id: config.targeting_gate_id.clone(),
        };
        state.experiments.insert(details.id.clone(), details);
        Ok(config.name.clone())
    }

    async fn get(&self, id: &str) -> Result<ExperimentDetails> {
        let mut state = self.state.lock();
        state.calls.push(format!("get {}", id));
        state
            .experiments
            .get(id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn update(&self, id: &str, update: &ExperimentUpdate) -> Result<ExperimentDetails> {
        let mut state = self.state.lock();
        state.calls.push(format!("update {}", id));
        let details = state
            .experiments
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        if let Some(status) = update.status {
            details.status = status;
        }
        if let Some(description) = &update.description {
            details.description = description.clone();
        }
        if let Some(allocation) = update.allocation {
            details.allocation = Some(allocation);
        }
        if let Some(gate) = &update.targeting_gate_id {
            details.targeting_gate_id = Some(gate.clone());
        }
        Ok(details.clone())
    }

    async fn list(&self) -> Result<Vec<ExperimentDetails>> {
        let mut state = self.state.lock();
        state.calls.push("list".to_string());
        Ok(state.experiments.values().cloned().collect())
    }

    async fn create_gate(&self, gate: &GateConfig) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(format!("create_gate {}", gate.name));
        state.gates.insert(gate.name.clone(), gate.clone());
        Ok(gate.name.clone())
    }
}

#[derive(Debug, Default)]
struct DeploymentLedger {
    deployments: BTreeMap<String, Deployment>,
    next_id: u64,
}

#[derive(Debug)]
pub struct OfflineDeployments {
    project_name: String,
    state: Mutex<DeploymentLedger>,
}

impl OfflineDeployments {
    pub fn new(project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            state: Mutex::new(DeploymentLedger::default()),
        }
    }

    /// Force a deployment into `state`, for exercising failure paths
    pub fn set_state(&self, id: &str, state: DeploymentState, message: Option<&str>) {
        if let Some(deployment) = self.state.lock().deployments.get_mut(id) {
            deployment.state = state;
            deployment.error_message = message.map(str::to_string);
        }
    }

    fn not_found(id: &str) -> AbforgeError {
        AbforgeError::NotFound {
            kind: "deployment".to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl DeploymentApi for OfflineDeployments {
    async fn create(&self, branch: &str) -> Result<Deployment> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let deployment = Deployment {
            id: format!("dpl_offline_{}", state.next_id),
            url: preview_url(&self.project_name, branch),
            state: DeploymentState::Ready,
            error_message: None,
        };
        state
            .deployments
            .insert(deployment.id.clone(), deployment.clone());
        Ok(deployment)
    }

    async fn get(&self, id: &str) -> Result<Deployment> {
        self.state
            .lock()
            .deployments
            .get(id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn list(&self, limit: usize) -> Result<Vec<Deployment>> {
        Ok(self
            .state
            .lock()
            .deployments
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cancel(&self, id: &str) -> Result<Deployment> {
        let mut state = self.state.lock();
        let deployment = state
            .deployments
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        if !deployment.state.is_terminal() {
            deployment.state = DeploymentState::Canceled;
        }
        Ok(deployment.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.state
            .lock()
            .deployments
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn logs(&self, id: &str) -> Result<Vec<String>> {
        let deployment = self.get(id).await?;
        Ok(vec![format!(
            "offline deployment {} is {}",
            deployment.id, deployment.state
        )])
    }
}
