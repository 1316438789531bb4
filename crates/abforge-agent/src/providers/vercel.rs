//! Vercel deployments API client

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use abforge_core::error::Result;
use abforge_core::DeploymentState;

use super::http::HttpService;
use super::{Deployment, DeploymentApi};

/// Preview URL Vercel assigns to a branch deployment
pub fn preview_url(project: &str, branch: &str) -> String {
    format!("https://{}-git-{}.vercel.app", project, branch.replace('/', "-"))
}

fn with_scheme(url: &str) -> String {
    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Deployment as returned by the v13 and v6 endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeployment {
    #[serde(alias = "uid")]
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    ready_state: Option<DeploymentState>,
    /// v6 list entries report `state`
    #[serde(default)]
    state: Option<DeploymentState>,
    #[serde(default)]
    error_message: Option<String>,
}

impl From<RawDeployment> for Deployment {
    fn from(raw: RawDeployment) -> Self {
        Self {
            id: raw.id,
            url: with_scheme(&raw.url),
            state: raw
                .ready_state
                .or(raw.state)
                .unwrap_or(DeploymentState::Unknown),
            error_message: raw.error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentList {
    deployments: Vec<RawDeployment>,
}

#[derive(Debug, Clone)]
pub struct VercelClient {
    token: String,
    project_id: String,
    project_name: String,
    team_id: Option<String>,
    repository: Option<String>,
    http: HttpService,
}

impl VercelClient {
    pub fn new(token: &str, project_id: &str, project_name: &str, base_url: &str) -> Self {
        Self {
            token: token.to_string(),
            project_id: project_id.to_string(),
            project_name: project_name.to_string(),
            team_id: None,
            repository: None,
            http: HttpService::new("vercel", base_url),
        }
    }

    pub fn with_team(mut self, team_id: &str) -> Self {
        self.team_id = Some(team_id.to_string());
        self
    }

    /// `owner/name` of the GitHub repository the project deploys from
    pub fn with_repository(mut self, repository: &str) -> Self {
        self.repository = Some(repository.to_string());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .client()
            .request(method, self.http.url(path))
            .bearer_auth(&self.token);
        if let Some(team) = &self.team_id {
            builder = builder.query(&[("teamId", team)]);
        }
        builder
    }

    fn create_body(&self, branch: &str) -> Value {
        let mut git_source = json!({ "type": "github", "ref": branch });
        if let Some((org, repo)) = self.repository.as_deref().and_then(|r| r.split_once('/')) {
            git_source["org"] = json!(org);
            git_source["repo"] = json!(repo);
        }
        json!({
            "name": self.project_name,
            "project": self.project_id,
            "target": "preview",
            "gitSource": git_source,
        })
    }
}

#[async_trait]
impl DeploymentApi for VercelClient {
    async fn create(&self, branch: &str) -> Result<Deployment> {
        tracing::info!("requesting preview deployment of {}", branch);
        let raw: RawDeployment = self
            .http
            .json(
                self.request(reqwest::Method::POST, "v13/deployments")
                    .json(&self.create_body(branch)),
            )
            .await?;
        Ok(raw.into())
    }

    async fn get(&self, id: &str) -> Result<Deployment> {
        let raw: RawDeployment = self
            .http
            .json(self.request(reqwest::Method::GET, &format!("v13/deployments/{}", id)))
            .await?;
        Ok(raw.into())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Deployment>> {
        let limit = limit.to_string();
        let list: DeploymentList = self
            .http
            .json(
                self.request(reqwest::Method::GET, "v6/deployments")
                    .query(&[("projectId", self.project_id.as_str()), ("limit", limit.as_str())]),
            )
            .await?;
        Ok(list.deployments.into_iter().map(Deployment::from).collect())
    }

    async fn cancel(&self, id: &str) -> Result<Deployment> {
        tracing::info!("cancelling deployment {}", id);
        let raw: RawDeployment = self
            .http
            .json(self.request(
                reqwest::Method::PATCH,
                &format!("v12/deployments/{}/cancel", id),
            ))
            .await?;
        Ok(raw.into())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        tracing::info!("deleting deployment {}", id);
        self.http
            .discard(self.request(reqwest::Method::DELETE, &format!("v13/deployments/{}", id)))
            .await
    }

    async fn logs(&self, id: &str) -> Result<Vec<String>> {
        let events: Vec<Value> = self
            .http
            .json(self.request(reqwest::Method::GET, &format!("v2/deployments/{}/events", id)))
            .await?;
        Ok(events
            .iter()
            .filter_map(|event| {
                event
                    .get("text")
                    .or_else(|| event.pointer("/payload/text"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }
}
