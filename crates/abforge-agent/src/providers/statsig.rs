//! Statsig console API client
//!
//! Responses from the console API are wrapped in a `data` envelope. The
//! experiment id is the experiment name.

use async_trait::async_trait;
use serde::Deserialize;

use abforge_core::error::Result;

use super::http::HttpService;
use super::{ExperimentApi, ExperimentConfig, ExperimentDetails, ExperimentUpdate, GateConfig};

const API_KEY_HEADER: &str = "STATSIG-API-KEY";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Clone)]
pub struct StatsigClient {
    api_key: String,
    http: HttpService,
}

impl StatsigClient {
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            api_key: api_key.into(),
            http: HttpService::new("statsig", base_url),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .client()
            .request(method, self.http.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
    }

    fn experiment_path(id: &str) -> String {
        format!("experiments/{}", id)
    }
}

#[async_trait]
impl ExperimentApi for StatsigClient {
    async fn create(&self, config: &ExperimentConfig) -> Result<String> {
        tracing::info!("creating experiment {}", config.name);
        let created: Envelope<Created> = self
            .http
            .json(self.request(reqwest::Method::POST, "experiments").json(config))
            .await?;
        Ok(created.data.id)
    }

    async fn get(&self, id: &str) -> Result<ExperimentDetails> {
        let details: Envelope<ExperimentDetails> = self
            .http
            .json(self.request(reqwest::Method::GET, &Self::experiment_path(id)))
            .await?;
        Ok(details.data)
    }

    async fn update(&self, id: &str, update: &ExperimentUpdate) -> Result<ExperimentDetails> {
        let details: Envelope<ExperimentDetails> = self
            .http
            .json(
                self.request(reqwest::Method::PATCH, &Self::experiment_path(id))
                    .json(update),
            )
            .await?;
        Ok(details.data)
    }

    async fn list(&self) -> Result<Vec<ExperimentDetails>> {
        let list: Envelope<Vec<ExperimentDetails>> = self
            .http
            .json(self.request(reqwest::Method::GET, "experiments"))
            .await?;
        Ok(list.data)
    }

    async fn create_gate(&self, gate: &GateConfig) -> Result<String> {
        tracing::info!("creating gate {}", gate.name);
        let created: Envelope<Created> = self
            .http
            .json(self.request(reqwest::Method::POST, "gates").json(gate))
            .await?;
        Ok(created.data.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abforge_core::{AbforgeError, ExperimentStatus};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn experiment(status: &str) -> serde_json::Value {
        json!({ "data": { "id": "btn", "name": "btn", "status": status, "groups": [] } })
    }

    #[tokio::test]
    async fn create_posts_config_with_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/experiments"))
            .and(header("STATSIG-API-KEY", "console-abc"))
            .and(body_partial_json(json!({ "name": "btn", "idType": "userID" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "btn" } })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StatsigClient::new("console-abc", &server.uri());
        let config = ExperimentConfig {
            name: "btn".to_string(),
            description: String::new(),
            hypothesis: String::new(),
            id_type: "userID".to_string(),
            groups: Vec::new(),
            allocation: 100.0,
            targeting_gate_id: None,
            tags: Vec::new(),
        };
        assert_eq!(client.create(&config).await.unwrap(), "btn");
    }

    #[tokio::test]
    async fn start_reads_then_patches_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/experiments/btn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(experiment("setup")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/experiments/btn"))
            .and(body_partial_json(json!({ "status": "active" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(experiment("active")))
            .expect(1)
            .mount(&server)
            .await;

        let client = StatsigClient::new("console-abc", &server.uri());
        let details = client.start("btn").await.unwrap();
        assert_eq!(details.status, ExperimentStatus::Active);

        let requests = server.received_requests().await.unwrap();
        let methods: Vec<String> = requests.iter().map(|r| r.method.to_string()).collect();
        assert_eq!(methods, vec!["GET", "PATCH"]);
    }

    #[tokio::test]
    async fn stop_on_missing_experiment_surfaces_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/experiments/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_string("experiment not found"))
            .mount(&server)
            .await;

        let client = StatsigClient::new("console-abc", &server.uri());
        let err = client.stop("ghost").await.unwrap_err();
        assert!(matches!(err, AbforgeError::RemoteApi { status: 404, .. }));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1, "no update after a failed read");
    }

    #[tokio::test]
    async fn list_unwraps_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/experiments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "id": "btn", "name": "btn", "status": "active" },
                    { "id": "hero", "name": "hero", "status": "decision_made" }
                ]
            })))
            .mount(&server)
            .await;

        let client = StatsigClient::new("console-abc", &server.uri());
        let list = client.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].status, ExperimentStatus::Unknown);
    }
}
