use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Contact, Deal, DealId, DealInput},
    error::{ApiErrorBody, RemoteApiError},
    protocol::DashboardSummary,
};
use tracing::debug;
use url::Url;

use crate::remote::CrmRemote;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct HttpRemoteOptions {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl HttpRemoteOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`CrmRemote`] backed by the CRM REST API under `{base}/api`.
pub struct HttpCrmRemote {
    http: Client,
    api_root: String,
    bearer_token: Option<String>,
}

impl HttpCrmRemote {
    pub fn new(options: HttpRemoteOptions) -> Result<Self> {
        let api_root = api_root(&options.base_url)?;
        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            api_root,
            bearer_token: options
                .bearer_token
                .filter(|token| !token.trim().is_empty()),
        })
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.api_root);
        debug!(%url, "crm: GET");
        let res = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("request failed: GET {url}"))?;
        decode(res).await
    }

    async fn send_input(
        &self,
        request: RequestBuilder,
        url: &str,
        input: &DealInput,
    ) -> Result<Deal> {
        let res = self
            .authorize(request)
            .json(input)
            .send()
            .await
            .with_context(|| format!("request failed: {url}"))?;
        decode(res).await
    }
}

#[async_trait]
impl CrmRemote for HttpCrmRemote {
    async fn fetch_deals(&self) -> Result<Vec<Deal>> {
        self.get_json("/deals").await
    }

    async fn fetch_contacts(&self) -> Result<Vec<Contact>> {
        self.get_json("/contacts").await
    }

    async fn create_deal(&self, input: &DealInput) -> Result<Deal> {
        let url = format!("{}/deals", self.api_root);
        debug!(%url, "crm: POST");
        self.send_input(self.http.post(&url), &url, input).await
    }

    async fn update_deal(&self, deal_id: &DealId, input: &DealInput) -> Result<Deal> {
        let url = format!("{}/deals/{}", self.api_root, deal_id.as_str());
        debug!(%url, stage = %input.stage, "crm: PUT");
        self.send_input(self.http.put(&url), &url, input).await
    }

    async fn fetch_dashboard_summary(&self) -> Result<DashboardSummary> {
        self.get_json("/analytics/dashboard").await
    }
}

fn api_root(base_url: &str) -> Result<String> {
    let parsed = Url::parse(base_url.trim())
        .with_context(|| format!("invalid crm api url: {base_url}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("crm api url must start with http:// or https://"));
    }
    let base = parsed.as_str().trim_end_matches('/');
    if base.ends_with("/api") {
        Ok(base.to_string())
    } else {
        Ok(format!("{base}/api"))
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status();
    if status.is_success() {
        return res
            .json::<T>()
            .await
            .context("failed to decode crm response body");
    }

    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|parsed| parsed.message())
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body
            }
        });
    Err(RemoteApiError::new(status.as_u16(), message).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_root_appends_api_prefix_once() {
        assert_eq!(
            api_root("http://localhost:8001").expect("root"),
            "http://localhost:8001/api"
        );
        assert_eq!(
            api_root("https://crm.example.com/api/").expect("root"),
            "https://crm.example.com/api"
        );
    }

    #[test]
    fn api_root_rejects_non_http_schemes() {
        assert!(api_root("ftp://crm.example.com").is_err());
        assert!(api_root("not a url").is_err());
    }

    #[test]
    fn blank_tokens_are_dropped() {
        let remote = HttpCrmRemote::new(HttpRemoteOptions::new("http://127.0.0.1:1").with_token("  "))
            .expect("remote");
        assert!(remote.bearer_token.is_none());
    }
}
