//! Thin HTTP client the CLI's reference subcommands use against the
//! core's own `/api/v3` surface. This is not a general-purpose
//! SDK — it backs exactly the subcommands in `main.rs` and sends the
//! trusted `X-Jobmon-User` header every caller in this workspace is
//! expected to supply.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct JobmonClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
}

/// Distinguishes a connectivity/server-side failure from the server rejecting the request on its
/// merits (400/401/404/409) — both are surfaced to the CLI's exit-code 1
/// path; only malformed CLI invocation
/// is exit code 2, and that's handled by `clap` before a client ever runs.
#[derive(Debug)]
pub enum ClientError {
    Transient(String),
    Rejected(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) | Self::Rejected(msg) => write!(f, "{msg}"),
        }
    }
}

impl JobmonClient {
    pub fn new(base_url: impl Into<String>, user: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), user: user.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3{path}", self.base_url.trim_end_matches('/'))
    }

    async fn finish<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T, ClientError> {
        let response = builder
            .header("X-Jobmon-User", &self.user)
            .send()
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Transient(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected(format!("{status}: {body}")));
        }
        response.json().await.map_err(|e| ClientError::Transient(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.finish(self.http.get(self.url(path))).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.finish(self.http.post(self.url(path)).json(body)).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.finish(self.http.put(self.url(path)).json(body)).await
    }
}
