use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use whaleray_auth::{CachedSecret, SecretError};
use whaleray_common::models::installation::Repository;

const API_BASE: &str = "https://api.github.com";
const ACCEPT_JSON: &str = "application/vnd.github+json";

/// The provider rejects future-dated assertions, so they are backdated by
/// this much against clock skew.
const ASSERTION_BACKDATE_SECS: i64 = 60;
const ASSERTION_LIFETIME_SECS: i64 = 600;

const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const CONTENT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("the installation grant is gone upstream")]
    InstallationGone,
    #[error("hosting provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("request to the hosting provider failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not sign the app assertion: {0}")]
    Assertion(#[from] jsonwebtoken::errors::Error),
    #[error("could not load the app signing key: {0}")]
    SigningKey(#[from] SecretError),
    #[error("unreadable file content: {0}")]
    Content(String),
}

/// Signs the self-issued assertion the app exchanges for installation
/// tokens.
#[async_trait]
pub trait AssertionSigner: Send + Sync {
    async fn sign(&self) -> Result<String, GithubError>;
}

#[derive(Serialize)]
struct AppAssertion {
    iat: i64,
    exp: i64,
    iss: String,
}

fn assertion_claims(app_id: &str, now: i64) -> AppAssertion {
    AppAssertion {
        iat: now - ASSERTION_BACKDATE_SECS,
        exp: now + ASSERTION_LIFETIME_SECS,
        iss: app_id.to_string(),
    }
}

/// RS256 signer backed by the app's PEM key in the secret store.
pub struct AppKeySigner {
    signing_key: CachedSecret,
    app_id: String,
}

impl AppKeySigner {
    pub fn new(signing_key: CachedSecret, app_id: impl Into<String>) -> Self {
        Self {
            signing_key,
            app_id: app_id.into(),
        }
    }
}

#[async_trait]
impl AssertionSigner for AppKeySigner {
    async fn sign(&self) -> Result<String, GithubError> {
        let key = self.signing_key.get().await?;
        let claims = assertion_claims(&self.app_id, Utc::now().timestamp());

        Ok(encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &EncodingKey::from_rsa_pem(key.as_bytes())?,
        )?)
    }
}

/// Short-lived token minted for one installation.
#[derive(Clone, Debug, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Flattened listing of a repository at a ref.
#[derive(Clone, Debug, Default)]
pub struct RepoTree {
    pub files: BTreeSet<String>,
    pub directories: BTreeSet<String>,
    /// Set when the provider truncated the listing of an enormous
    /// repository.
    pub truncated: bool,
}

impl RepoTree {
    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains(path)
    }
}

#[derive(Deserialize)]
struct RawTree {
    #[serde(default)]
    tree: Vec<RawTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct RawTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RawContent {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct RawRepositoryList {
    #[serde(default)]
    repositories: Vec<RawRepository>,
}

#[derive(Deserialize)]
struct RawRepository {
    id: i64,
    name: String,
    full_name: String,
    private: bool,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Client for the hosting provider: token minting plus the read calls the
/// pipeline needs.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    signer: Arc<dyn AssertionSigner>,
}

impl GithubClient {
    pub fn new(signer: Arc<dyn AssertionSigner>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
            signer,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Mint a short-lived access token for an installation. 401/404 from the
    /// exchange mean the grant is gone upstream and the installation row
    /// should be evicted.
    #[instrument(skip(self))]
    pub async fn installation_token(
        &self,
        installation_id: i64,
    ) -> Result<InstallationToken, GithubError> {
        let assertion = self.signer.sign().await?;

        self.exchange_token(&assertion, installation_id).await
    }

    async fn exchange_token(
        &self,
        assertion: &str,
        installation_id: i64,
    ) -> Result<InstallationToken, GithubError> {
        let response = self
            .http
            .post(format!(
                "{}/app/installations/{installation_id}/access_tokens",
                self.api_base
            ))
            .bearer_auth(assertion)
            .header(ACCEPT, ACCEPT_JSON)
            .timeout(TOKEN_EXCHANGE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CREATED {
            Ok(response.json().await?)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            Err(GithubError::InstallationGone)
        } else {
            Err(GithubError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// One recursive tree call per deployment keeps the probe well inside
    /// the provider's hourly rate limit.
    #[instrument(skip(self, token))]
    pub async fn repository_tree(
        &self,
        token: &str,
        repository: &str,
        branch: &str,
    ) -> Result<RepoTree, GithubError> {
        let response = self
            .http
            .get(format!(
                "{}/repos/{repository}/git/trees/{branch}",
                self.api_base
            ))
            .query(&[("recursive", "1")])
            .bearer_auth(token)
            .header(ACCEPT, ACCEPT_JSON)
            .timeout(CONTENT_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GithubError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let raw: RawTree = response.json().await?;
        let mut tree = RepoTree {
            truncated: raw.truncated,
            ..Default::default()
        };
        for entry in raw.tree {
            match entry.kind.as_str() {
                "blob" => {
                    tree.files.insert(entry.path);
                }
                "tree" => {
                    tree.directories.insert(entry.path);
                }
                _ => {}
            }
        }

        Ok(tree)
    }

    #[instrument(skip(self, token))]
    pub async fn file_content(
        &self,
        token: &str,
        repository: &str,
        branch: &str,
        path: &str,
    ) -> Result<String, GithubError> {
        let response = self
            .http
            .get(format!(
                "{}/repos/{repository}/contents/{path}",
                self.api_base
            ))
            .query(&[("ref", branch)])
            .bearer_auth(token)
            .header(ACCEPT, ACCEPT_JSON)
            .timeout(CONTENT_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GithubError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let raw: RawContent = response.json().await?;
        // The content arrives base64 encoded with embedded newlines
        let cleaned: String = raw.content.split_whitespace().collect();
        let bytes = BASE64
            .decode(cleaned)
            .map_err(|error| GithubError::Content(error.to_string()))?;

        String::from_utf8(bytes).map_err(|error| GithubError::Content(error.to_string()))
    }

    /// Probe a single path without downloading it.
    #[instrument(skip(self, token))]
    pub async fn file_exists(
        &self,
        token: &str,
        repository: &str,
        branch: &str,
        path: &str,
    ) -> Result<bool, GithubError> {
        let response = self
            .http
            .head(format!(
                "{}/repos/{repository}/contents/{path}",
                self.api_base
            ))
            .query(&[("ref", branch)])
            .bearer_auth(token)
            .header(ACCEPT, ACCEPT_JSON)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        Ok(response.status().is_success())
    }

    /// Repositories reachable through an installation token.
    #[instrument(skip(self, token))]
    pub async fn installation_repositories(
        &self,
        token: &str,
    ) -> Result<Vec<Repository>, GithubError> {
        let response = self
            .http
            .get(format!("{}/installation/repositories", self.api_base))
            .bearer_auth(token)
            .header(ACCEPT, ACCEPT_JSON)
            .timeout(CONTENT_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(GithubError::InstallationGone);
        }
        if !status.is_success() {
            return Err(GithubError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let raw: RawRepositoryList = response.json().await?;

        Ok(raw
            .repositories
            .into_iter()
            .map(|repository| Repository {
                id: repository.id,
                name: repository.name,
                full_name: repository.full_name,
                private: repository.private,
                default_branch: repository.default_branch.unwrap_or_else(|| "main".to_string()),
                language: repository.language,
                description: repository.description,
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// Signer that skips RS256 for tests exercising the HTTP contract.
    pub(crate) struct StaticSigner;

    #[async_trait]
    impl AssertionSigner for StaticSigner {
        async fn sign(&self) -> Result<String, GithubError> {
            Ok("test-assertion".to_string())
        }
    }

    pub(crate) fn client_for(server: &MockServer) -> GithubClient {
        GithubClient::new(Arc::new(StaticSigner)).with_api_base(server.uri())
    }

    #[test]
    fn assertion_is_backdated() {
        let now = 1_700_000_000;
        let claims = assertion_claims("12345", now);

        assert_eq!(claims.iat, now - 60);
        assert_eq!(claims.exp, now + 600);
        assert_eq!(claims.iss, "12345");
    }

    #[tokio::test]
    async fn token_exchange_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/42/access_tokens"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "token": "ghs_abcdef",
                "expires_at": "2024-01-01T00:10:00Z",
            })))
            .mount(&server)
            .await;

        let token = client_for(&server).installation_token(42).await.unwrap();

        assert_eq!(token.token, "ghs_abcdef");
        assert_eq!(token.expires_at.as_deref(), Some("2024-01-01T00:10:00Z"));
    }

    #[tokio::test]
    async fn gone_installation_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/42/access_tokens"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(matches!(
            client_for(&server).installation_token(42).await,
            Err(GithubError::InstallationGone)
        ));
    }

    #[tokio::test]
    async fn provider_outage_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/42/access_tokens"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        assert!(matches!(
            client_for(&server).installation_token(42).await,
            Err(GithubError::Api { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn tree_splits_files_and_directories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/web/git/trees/main"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tree": [
                    {"path": "build.gradle", "type": "blob"},
                    {"path": "src", "type": "tree"},
                    {"path": "src/main/java/App.java", "type": "blob"},
                ],
                "truncated": false,
            })))
            .mount(&server)
            .await;

        let tree = client_for(&server)
            .repository_tree("token", "alice/web", "main")
            .await
            .unwrap();

        assert!(tree.contains_file("build.gradle"));
        assert!(tree.contains_file("src/main/java/App.java"));
        assert!(tree.directories.contains("src"));
        assert!(!tree.contains_file("src"));
        assert!(!tree.truncated);
    }

    #[tokio::test]
    async fn content_is_base64_with_newlines() {
        let server = MockServer::start().await;
        // "plugins { id 'org.springframework.boot' }" chunked the way the
        // provider chunks it
        let encoded = "cGx1Z2lucyB7IGlkICdvcmcuc3ByaW5nZnJh\nbWV3b3JrLmJvb3QnIH0=";
        Mock::given(method("GET"))
            .and(path("/repos/alice/web/contents/build.gradle"))
            .and(query_param("ref", "main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": encoded,
                "encoding": "base64",
            })))
            .mount(&server)
            .await;

        let content = client_for(&server)
            .file_content("token", "alice/web", "main", "build.gradle")
            .await
            .unwrap();

        assert_eq!(content, "plugins { id 'org.springframework.boot' }");
    }

    #[tokio::test]
    async fn repositories_are_simplified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/installation/repositories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "repositories": [{
                    "id": 7,
                    "name": "web",
                    "full_name": "alice/web",
                    "private": true,
                    "default_branch": "trunk",
                    "language": "Java",
                    "description": null,
                }],
            })))
            .mount(&server)
            .await;

        let repositories = client_for(&server)
            .installation_repositories("token")
            .await
            .unwrap();

        assert_eq!(repositories.len(), 1);
        assert_eq!(repositories[0].full_name, "alice/web");
        assert_eq!(repositories[0].default_branch, "trunk");
        assert_eq!(repositories[0].language.as_deref(), Some("Java"));
    }

    #[tokio::test]
    async fn repository_listing_with_revoked_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/installation/repositories"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(matches!(
            client_for(&server).installation_repositories("token").await,
            Err(GithubError::InstallationGone)
        ));
    }
}
