use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::PageError;

/// The seam between the page protocol and the wire.
///
/// Injected as `Arc<dyn ApiClient>` so tests can substitute a fake. The
/// token cache lives on the client and is shared by every page built from
/// it; `set_token` must be idempotent and safe to repeat.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// One `action=query` round trip, flattening the response's page map
    /// into records truncated to `limit`. An `error` object in the response
    /// raises `PageError::Api`.
    async fn query(&self, limit: usize, params: &[(&str, String)]) -> Result<Vec<Value>, PageError>;

    /// One mutating action invocation (edit, move). Returns the raw parsed
    /// payload, including backend-reported failures; only transport
    /// failures raise.
    async fn call(&self, params: &[(&str, String)]) -> Result<Value, PageError>;

    /// Read the cached token for a capability, if one has been fetched.
    async fn token(&self, name: &str) -> Option<String>;

    /// Fetch and cache the token for a capability. A backend that does not
    /// grant the capability leaves the cache unpopulated; the caller decides
    /// whether that is a permission failure.
    async fn set_token(&self, name: &str) -> Result<(), PageError>;
}

pub struct ReqwestApiClient {
    http: reqwest::Client,
    api_url: url::Url,
    tokens: RwLock<HashMap<String, String>>,
}

impl ReqwestApiClient {
    pub fn new(api_url: url::Url) -> Self {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let http = reqwest::ClientBuilder::new()
            .cookie_provider(jar)
            .user_agent("mwpage/0.1.0 (https://github.com/mwpage-rs/mwpage)")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            api_url,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Log in with a bot password. Cookie-based; later requests on this
    /// client carry the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), PageError> {
        crate::auth::login_bot_password(&self.http, &self.api_url, username, password).await
    }
}

fn check_api_error(resp: &Value) -> Result<(), PageError> {
    if let Some(error) = resp.get("error") {
        let code = error["code"].as_str().unwrap_or("unknown").to_string();
        let info = error["info"].as_str().unwrap_or("").to_string();
        return Err(PageError::Api { code, info });
    }
    Ok(())
}

#[async_trait]
impl ApiClient for ReqwestApiClient {
    async fn query(&self, limit: usize, params: &[(&str, String)]) -> Result<Vec<Value>, PageError> {
        let mut query_params: Vec<(&str, &str)> = vec![("action", "query"), ("format", "json")];
        query_params.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let resp: Value = self
            .http
            .get(self.api_url.as_str())
            .query(&query_params)
            .send()
            .await?
            .json()
            .await?;

        check_api_error(&resp)?;

        let mut records: Vec<Value> = resp["query"]["pages"]
            .as_object()
            .map(|pages| pages.values().cloned().collect())
            .unwrap_or_default();
        records.truncate(limit);
        debug!(count = records.len(), "query returned records");
        Ok(records)
    }

    async fn call(&self, params: &[(&str, String)]) -> Result<Value, PageError> {
        let mut form_params: Vec<(&str, &str)> = vec![("format", "json")];
        form_params.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let resp: Value = self
            .http
            .post(self.api_url.as_str())
            .form(&form_params)
            .send()
            .await?
            .json()
            .await?;

        // Backend-reported failures ride back in the payload; the page
        // protocol (or its caller) inspects the status.
        Ok(resp)
    }

    async fn token(&self, name: &str) -> Option<String> {
        self.tokens.read().await.get(name).cloned()
    }

    async fn set_token(&self, name: &str) -> Result<(), PageError> {
        let resp: Value = self
            .http
            .get(self.api_url.as_str())
            .query(&[
                ("action", "query"),
                ("meta", "tokens"),
                ("type", name),
                ("format", "json"),
            ])
            .send()
            .await?
            .json()
            .await?;

        let key = format!("{name}token");
        match resp["query"]["tokens"][key.as_str()].as_str() {
            Some(token) => {
                self.tokens
                    .write()
                    .await
                    .insert(name.to_string(), token.to_string());
                Ok(())
            }
            None => {
                // No token granted: not a transport failure. The caller
                // checks the cache and raises Permission if it needed one.
                warn!(capability = name, "no token granted for capability");
                Ok(())
            }
        }
    }
}
