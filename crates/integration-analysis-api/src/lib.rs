use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cloudsync_core::{
    AnalysisTransport, BranchRecord, CoverageOverview, CredentialSource, FirstAnalysisStatus,
    IssueRecord, JoinStatus, OnboardingStatus, OrganizationRecord, Provider, PullRequestAnalysis,
    RepositoryRecord, TransportError,
};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const DEFAULT_API_BASE_URL: &str = "https://app.codacy.com/api/v3";
pub const DEFAULT_TOKEN_ENV: &str = "CODACY_API_TOKEN";

const API_TOKEN_HEADER: &str = "api-token";
const ISSUE_SEARCH_LIMIT: u32 = 1000;

/// Resolves the API token on every call so a token exported after startup is
/// picked up without a restart.
#[derive(Clone)]
pub struct ApiTokenSource {
    env_var: String,
    fixed: Option<String>,
}

impl fmt::Debug for ApiTokenSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiTokenSource")
            .field("env_var", &self.env_var)
            .field("fixed", &self.fixed.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for ApiTokenSource {
    fn default() -> Self {
        Self::from_env(DEFAULT_TOKEN_ENV)
    }
}

impl ApiTokenSource {
    pub fn from_env(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
            fixed: None,
        }
    }

    /// A configured token wins over the environment variable.
    pub fn with_fixed_token(mut self, token: Option<String>) -> Self {
        self.fixed = token
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    pub fn token(&self) -> Option<String> {
        if let Some(token) = &self.fixed {
            return Some(token.clone());
        }
        std::env::var(&self.env_var)
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }
}

impl CredentialSource for ApiTokenSource {
    fn has_credential(&self) -> bool {
        self.token().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: ApiMethod,
    pub path: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: ApiMethod::Get,
            path: path.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post<I, S>(path: I, body: serde_json::Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: ApiMethod::Post,
            path: path.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_owned(), value.to_string()));
        self
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<serde_json::Value, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestHttpTransport {
    base_url: Url,
    tokens: ApiTokenSource,
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestHttpTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReqwestHttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("tokens", &self.tokens)
            .field("client", &self.client)
            .finish()
    }
}

impl ReqwestHttpTransport {
    pub fn new(base_url: &str, tokens: ApiTokenSource) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url).map_err(|err| {
            TransportError::Request(format!("invalid analysis API base url `{base_url}`: {err}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::Request(format!(
                "analysis API base url `{base_url}` cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent("cloudsync/integration-analysis-api")
            .build()
            .map_err(|err| {
                TransportError::Request(format!("failed to initialize analysis HTTP client: {err}"))
            })?;

        Ok(Self {
            base_url,
            tokens,
            client,
        })
    }

    pub fn endpoint(&self, request: &ApiRequest) -> Url {
        endpoint_url(&self.base_url, request)
    }
}

fn endpoint_url(base_url: &Url, request: &ApiRequest) -> Url {
    let mut url = base_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        segments.extend(request.path.iter());
    }
    if !request.query.is_empty() {
        url.query_pairs_mut().extend_pairs(request.query.iter());
    }
    url
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<serde_json::Value, TransportError> {
        let token = self.tokens.token().ok_or_else(|| {
            TransportError::AuthenticationRequired(format!(
                "{} is not set. Export an API token before syncing.",
                self.tokens.env_var()
            ))
        })?;

        let url = self.endpoint(&request);
        debug!(method = ?request.method, url = %url, "calling analysis API");
        let builder = match request.method {
            ApiMethod::Get => self.client.get(url),
            ApiMethod::Post => self.client.post(url),
        };
        let builder = builder
            .header(API_TOKEN_HEADER, token)
            .header(reqwest::header::ACCEPT, "application/json");
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(|err| {
            TransportError::Request(format!("failed to call analysis API: {err}"))
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|err| {
            TransportError::Request(format!("failed to read analysis API response: {err}"))
        })?;

        check_status(status, &body)?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| {
            TransportError::Decode(format!("failed to parse analysis API response JSON: {err}"))
        })
    }
}

fn check_status(status: StatusCode, body: &str) -> Result<(), TransportError> {
    if status.is_success() {
        return Ok(());
    }

    let detail = format!("HTTP {status}: {}", truncate_for_error(body));
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::AuthenticationRequired(detail)
        }
        StatusCode::NOT_FOUND => TransportError::NotFound(detail),
        _ => TransportError::Request(detail),
    })
}

fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

fn decode_data<T: DeserializeOwned>(
    value: serde_json::Value,
    what: &str,
) -> Result<T, TransportError> {
    serde_json::from_value::<DataEnvelope<T>>(value)
        .map(|envelope| envelope.data)
        .map_err(|err| TransportError::Decode(format!("unexpected {what} payload: {err}")))
}

/// Maps the organization lookup done after a repository was not found onto
/// the onboarding step the user still has to take.
pub fn onboarding_from_organization(
    organization: Result<OrganizationRecord, TransportError>,
) -> Result<OnboardingStatus, TransportError> {
    match organization {
        Ok(record) => Ok(match record.membership.map(|m| m.join_status) {
            Some(JoinStatus::Member) => OnboardingStatus::NeedsToAddRepository,
            Some(JoinStatus::PendingMember) => OnboardingStatus::HasPendingJoinOrganization,
            Some(JoinStatus::Unknown) | None => OnboardingStatus::NeedsToJoinOrganization,
        }),
        Err(TransportError::NotFound(_)) => Ok(OnboardingStatus::NeedsToAddOrganization),
        Err(error) => Err(error),
    }
}

pub struct AnalysisApiClient {
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for AnalysisApiClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("AnalysisApiClient").finish()
    }
}

impl AnalysisApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn with_reqwest(base_url: &str, tokens: ApiTokenSource) -> Result<Self, TransportError> {
        Ok(Self::new(Arc::new(ReqwestHttpTransport::new(
            base_url, tokens,
        )?)))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        what: &str,
    ) -> Result<T, TransportError> {
        let value = self.transport.execute(request).await?;
        decode_data(value, what)
    }
}

fn organization_path(provider: Provider, organization: &str) -> Vec<String> {
    vec![
        "organizations".to_owned(),
        provider.as_str().to_owned(),
        organization.to_owned(),
    ]
}

fn repository_path(provider: Provider, organization: &str, repository: &str) -> Vec<String> {
    let mut path = organization_path(provider, organization);
    path.push("repositories".to_owned());
    path.push(repository.to_owned());
    path
}

fn analysis_repository_path(
    provider: Provider,
    organization: &str,
    repository: &str,
) -> Vec<String> {
    let mut path = vec!["analysis".to_owned()];
    path.extend(repository_path(provider, organization, repository));
    path
}

#[async_trait]
impl AnalysisTransport for AnalysisApiClient {
    async fn get_repository_with_analysis(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<RepositoryRecord, TransportError> {
        self.fetch(
            ApiRequest::get(analysis_repository_path(provider, organization, repository)),
            "repository",
        )
        .await
    }

    async fn get_organization(
        &self,
        provider: Provider,
        organization: &str,
    ) -> Result<OrganizationRecord, TransportError> {
        self.fetch(
            ApiRequest::get(organization_path(provider, organization)),
            "organization",
        )
        .await
    }

    async fn list_coverage_reports(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<CoverageOverview, TransportError> {
        let mut path = repository_path(provider, organization, repository);
        path.extend(["coverage".to_owned(), "status".to_owned()]);
        self.fetch(ApiRequest::get(path), "coverage").await
    }

    async fn list_repository_branches(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<Vec<BranchRecord>, TransportError> {
        let mut path = repository_path(provider, organization, repository);
        path.push("branches".to_owned());
        self.fetch(
            ApiRequest::get(path).with_query("enabled", true),
            "branch list",
        )
        .await
    }

    async fn list_repository_pull_requests(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
        limit: u32,
    ) -> Result<Vec<PullRequestAnalysis>, TransportError> {
        let mut path = analysis_repository_path(provider, organization, repository);
        path.push("pull-requests".to_owned());
        self.fetch(
            ApiRequest::get(path).with_query("limit", limit),
            "pull request list",
        )
        .await
    }

    async fn get_first_analysis_status(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
    ) -> Result<Option<FirstAnalysisStatus>, TransportError> {
        let mut path = analysis_repository_path(provider, organization, repository);
        path.push("first-analysis".to_owned());
        match self
            .fetch::<FirstAnalysisStatus>(ApiRequest::get(path), "first analysis status")
            .await
        {
            Ok(status) => Ok(Some(status)),
            Err(TransportError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn get_onboarding_status(
        &self,
        provider: Provider,
        organization: &str,
    ) -> Result<OnboardingStatus, TransportError> {
        onboarding_from_organization(self.get_organization(provider, organization).await)
    }

    async fn get_repository_pull_request(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
        number: u64,
    ) -> Result<PullRequestAnalysis, TransportError> {
        let mut path = analysis_repository_path(provider, organization, repository);
        path.extend(["pull-requests".to_owned(), number.to_string()]);
        self.fetch(ApiRequest::get(path), "pull request").await
    }

    async fn search_repository_issues(
        &self,
        provider: Provider,
        organization: &str,
        repository: &str,
        branch: &str,
    ) -> Result<Vec<IssueRecord>, TransportError> {
        let mut path = analysis_repository_path(provider, organization, repository);
        path.extend(["issues".to_owned(), "search".to_owned()]);
        self.fetch(
            ApiRequest::post(path, json!({ "branchName": branch }))
                .with_query("limit", ISSUE_SEARCH_LIMIT),
            "issue search",
        )
        .await
    }
}
