//! Request plumbing shared by the live clients

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use abforge_core::error::{AbforgeError, Result};

/// One remote service: its name for error reporting and its base URL
#[derive(Debug, Clone)]
pub struct HttpService {
    service: &'static str,
    base_url: String,
    client: Client,
}

impl HttpService {
    pub fn new(service: &'static str, base_url: &str) -> Self {
        Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send, mapping network failures to `Transport` and non-2xx to `RemoteApi`
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| AbforgeError::transport(self.service, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("{} answered {}: {}", self.service, status, body);
            return Err(AbforgeError::remote(self.service, status.as_u16(), body));
        }
        Ok(response)
    }

    pub async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(|e| {
            AbforgeError::transport(self.service, format!("unexpected response body: {}", e))
        })
    }

    /// Send and discard the body
    pub async fn discard(&self, request: RequestBuilder) -> Result<()> {
        self.send(request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad thing"))
            .mount(&server)
            .await;

        let http = HttpService::new("statsig", &format!("{}/", server.uri()));
        let err = http
            .discard(http.client().get(http.url("/things")))
            .await
            .unwrap_err();
        match err {
            AbforgeError::RemoteApi { service, status, body } => {
                assert_eq!(service, "statsig");
                assert_eq!(status, 422);
                assert_eq!(body, "bad thing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let http = HttpService::new("vercel", "http://127.0.0.1:9");
        let err = http
            .discard(http.client().get(http.url("v13/deployments/x")))
            .await
            .unwrap_err();
        assert!(matches!(err, AbforgeError::Transport { .. }));
    }
}
