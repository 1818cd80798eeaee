//! Shared HTTP plumbing for provider adapters.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::llm::error::LlmError;

/// Default timeout for provider setup calls (model listing etc).
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// How a request authenticates against the backend.
#[derive(Clone)]
pub enum AuthMode {
    None,
    Bearer(String),
    /// Named header, e.g. Azure's `api-key`.
    Header(&'static str, String),
    /// Query parameter, e.g. Gemini's `key`.
    QueryKey(String),
}

// Manual Debug: never print the held secret, only which variant it is.
impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::None => f.write_str("None"),
            AuthMode::Bearer(_) => f.write_str("Bearer(..)"),
            AuthMode::Header(name, _) => write!(f, "Header({name:?}, ..)"),
            AuthMode::QueryKey(_) => f.write_str("QueryKey(..)"),
        }
    }
}

/// One adapter's HTTP identity: provider label, endpoint, credentials.
/// Debug redacts the auth mode: see `AuthMode`'s manual impl.
#[derive(Clone, Debug)]
pub struct HttpBase {
    pub provider: String,
    pub endpoint: String,
    pub auth: AuthMode,
    pub http: Client,
}

impl HttpBase {
    pub fn new(provider: impl Into<String>, endpoint: impl Into<String>, auth: AuthMode) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            auth,
            http: Client::new(),
        }
    }

    pub fn build_url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn apply_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            AuthMode::None => builder,
            AuthMode::Bearer(token) => builder.bearer_auth(token),
            AuthMode::Header(name, value) => builder.header(*name, value),
            AuthMode::QueryKey(key) => builder.query(&[("key", key.as_str())]),
        }
    }

    /// POST a JSON body and decode a JSON response, mapping HTTP failures
    /// to `LlmError::Api` with the status code and body preserved.
    pub async fn post_json<Req, Res>(&self, url: &str, body: &Req) -> Result<Res, LlmError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let response = self
            .apply_auth(self.http.post(url))
            .json(body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        response.json().await.map_err(|err| {
            LlmError::invalid_response(&self.provider, format!("decoding response body: {err}"))
        })
    }

    /// POST a JSON body and return the raw response for streaming decode.
    pub async fn post_stream<Req>(&self, url: &str, body: &Req) -> Result<Response, LlmError>
    where
        Req: Serialize,
    {
        let response = self
            .apply_auth(self.http.post(url))
            .json(body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// GET a JSON resource.
    pub async fn get_json<Res>(&self, url: &str) -> Result<Res, LlmError>
    where
        Res: DeserializeOwned,
    {
        let response = self
            .apply_auth(self.http.get(url).timeout(SETUP_TIMEOUT))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        response.json().await.map_err(|err| {
            LlmError::invalid_response(&self.provider, format!("decoding response body: {err}"))
        })
    }

    async fn check_status(response: Response) -> Result<Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::api(status.as_u16(), body))
    }
}

/// Read a required environment variable, mapping absence to a
/// configuration error naming the variable.
pub fn require_env(name: &str) -> Result<String, LlmError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(LlmError::configuration(format!(
            "credentials missing: {name} is not set"
        ))),
    }
}
