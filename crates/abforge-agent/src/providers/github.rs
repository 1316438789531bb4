//! GitHub REST client for experiment pull requests

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use abforge_core::error::Result;

use super::http::HttpService;
use super::{MergeMethod, PullRequest, PullRequestApi, PullRequestDraft, PullRequestStatus, Review};

const USER_AGENT: &str = concat!("abforge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    html_url: String,
    state: String,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    merged: bool,
}

impl From<RawPullRequest> for PullRequest {
    fn from(raw: RawPullRequest) -> Self {
        Self {
            number: raw.number,
            url: raw.html_url,
            state: raw.state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    user: Option<RawUser>,
    state: String,
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    token: String,
    /// `owner/name`
    repository: String,
    http: HttpService,
}

impl GitHubClient {
    pub fn new(token: &str, repository: &str, base_url: &str) -> Self {
        Self {
            token: token.to_string(),
            repository: repository.to_string(),
            http: HttpService::new("github", base_url),
        }
    }

    fn owner(&self) -> &str {
        self.repository
            .split_once('/')
            .map(|(owner, _)| owner)
            .unwrap_or(&self.repository)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .client()
            .request(
                method,
                self.http.url(&format!("repos/{}/{}", self.repository, path)),
            )
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }
}

#[async_trait]
impl PullRequestApi for GitHubClient {
    async fn create(&self, draft: &PullRequestDraft) -> Result<PullRequest> {
        tracing::info!("opening pull request {} -> {}", draft.head, draft.base);
        let raw: RawPullRequest = self
            .http
            .json(self.request(reqwest::Method::POST, "pulls").json(&json!({
                "title": draft.title,
                "body": draft.body,
                "head": draft.head,
                "base": draft.base,
                "draft": draft.draft,
            })))
            .await?;
        Ok(raw.into())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<()> {
        if reviewers.is_empty() {
            return Ok(());
        }
        self.http
            .discard(
                self.request(
                    reqwest::Method::POST,
                    &format!("pulls/{}/requested_reviewers", number),
                )
                .json(&json!({ "reviewers": reviewers })),
            )
            .await
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.http
            .discard(
                self.request(reqwest::Method::POST, &format!("issues/{}/labels", number))
                    .json(&json!({ "labels": labels })),
            )
            .await
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<()> {
        self.http
            .discard(
                self.request(reqwest::Method::POST, &format!("issues/{}/comments", number))
                    .json(&json!({ "body": body })),
            )
            .await
    }

    async fn find_existing(&self, head: &str, base: &str) -> Result<Option<PullRequest>> {
        let qualified_head = format!("{}:{}", self.owner(), head);
        let open: Vec<RawPullRequest> = self
            .http
            .json(self.request(reqwest::Method::GET, "pulls").query(&[
                ("head", qualified_head.as_str()),
                ("base", base),
                ("state", "open"),
            ]))
            .await?;
        Ok(open.into_iter().next().map(PullRequest::from))
    }

    async fn status(&self, number: u64) -> Result<PullRequestStatus> {
        let pr: RawPullRequest = self
            .http
            .json(self.request(reqwest::Method::GET, &format!("pulls/{}", number)))
            .await?;
        let reviews: Vec<RawReview> = self
            .http
            .json(self.request(reqwest::Method::GET, &format!("pulls/{}/reviews", number)))
            .await?;

        Ok(PullRequestStatus {
            state: pr.state,
            mergeable: pr.mergeable,
            merged: pr.merged,
            reviews: reviews
                .into_iter()
                .map(|r| Review {
                    user: r.user.map(|u| u.login).unwrap_or_default(),
                    state: r.state,
                })
                .collect(),
        })
    }

    async fn merge(&self, number: u64, method: MergeMethod) -> Result<()> {
        tracing::info!("merging pull request #{} ({:?})", number, method);
        self.http
            .discard(
                self.request(reqwest::Method::PUT, &format!("pulls/{}/merge", number))
                    .json(&json!({ "merge_method": method })),
            )
            .await
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        tracing::info!("deleting remote branch {}", name);
        self.http
            .discard(self.request(
                reqwest::Method::DELETE,
                &format!("git/refs/heads/{}", name),
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abforge_core::AbforgeError;
    use wiremock::matchers::{body_json, body_partial_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new("ghp_x", "techvault/storefront", &server.uri())
    }

    #[tokio::test]
    async fn create_returns_number_and_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/techvault/storefront/pulls"))
            .and(header_exists("user-agent"))
            .and(body_partial_json(json!({ "head": "exp/btn", "base": "main", "draft": true })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "number": 42,
                "html_url": "https://github.com/techvault/storefront/pull/42",
                "state": "open"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pr = client(&server)
            .create(&PullRequestDraft {
                title: "Experiment: btn".to_string(),
                body: String::new(),
                head: "exp/btn".to_string(),
                base: "main".to_string(),
                draft: true,
            })
            .await
            .unwrap();
        assert_eq!(pr.number, 42);
        assert!(pr.url.ends_with("/pull/42"));
    }

    #[tokio::test]
    async fn find_existing_qualifies_head_with_owner() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/techvault/storefront/pulls"))
            .and(query_param("head", "techvault:exp/btn"))
            .and(query_param("state", "open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let found = client(&server).find_existing("exp/btn", "main").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn status_combines_pull_and_reviews() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/techvault/storefront/pulls/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "number": 7,
                "html_url": "https://github.com/techvault/storefront/pull/7",
                "state": "open",
                "mergeable": true,
                "merged": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/techvault/storefront/pulls/7/reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "user": { "login": "dana" }, "state": "APPROVED" }
            ])))
            .mount(&server)
            .await;

        let status = client(&server).status(7).await.unwrap();
        assert_eq!(status.mergeable, Some(true));
        assert_eq!(status.reviews[0].user, "dana");
        assert_eq!(status.reviews[0].state, "APPROVED");
    }

    #[tokio::test]
    async fn merge_sends_method_and_failures_surface() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/techvault/storefront/pulls/7/merge"))
            .and(body_json(json!({ "merge_method": "squash" })))
            .respond_with(ResponseTemplate::new(405).set_body_string("not mergeable"))
            .mount(&server)
            .await;

        let err = client(&server).merge(7, MergeMethod::Squash).await.unwrap_err();
        assert!(matches!(err, AbforgeError::RemoteApi { status: 405, .. }));
    }

    #[tokio::test]
    async fn empty_reviewer_and_label_lists_skip_requests() {
        let server = MockServer::start().await;
        let gh = client(&server);
        gh.request_reviewers(1, &[]).await.unwrap();
        gh.add_labels(1, &[]).await.unwrap();
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
