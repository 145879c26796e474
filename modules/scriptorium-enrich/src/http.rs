//! Thin HTTP client for the tool gateway: one JSON POST per invocation with
//! an explicit per-call timeout. Status codes map onto `ToolError` so the
//! retry layer classifies without string matching.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::debug;

use crate::tools::{ToolError, ToolInvoker};

pub struct HttpToolInvoker {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpToolInvoker {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, ToolError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| ToolError::InvalidResponse(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(
        &self,
        agent_id: &str,
        tool: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let url = format!("{}/invoke", self.endpoint);
        debug!(agent_id, tool, timeout_secs = timeout.as_secs(), "Tool invocation");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .timeout(timeout)
            .json(&json!({ "agent_id": agent_id, "tool": tool, "args": args }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(timeout)
                } else {
                    ToolError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ToolError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ToolError::InvalidResponse(e.to_string()))
    }
}
