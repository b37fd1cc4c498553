use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{truncate_str, Tool, ToolContext, ToolResult};

const MAX_CONTENT_BYTES: usize = 200 * 1024;
const FETCH_TIMEOUT_SECS: u64 = 30;

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the response body as text, \
         truncated to 200KB."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http(s) URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: url"))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ToolResult::error(
                format!("Only http(s) URLs are supported: {url}"),
                format!("web_fetch: {url}"),
            ));
        }

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Ok(ToolResult::error(
                    "Fetch aborted by cancellation",
                    format!("web_fetch: {url}"),
                ));
            }
            r = self.client.get(url).send() => r,
        };

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let mut body = resp.text().await.unwrap_or_default();
                if body.len() > MAX_CONTENT_BYTES {
                    let cut = truncate_str(&body, MAX_CONTENT_BYTES).len();
                    body.truncate(cut);
                    body.push_str("\n... (content truncated)");
                }
                Ok(ToolResult {
                    output: body,
                    title: format!("web_fetch: {url}"),
                    is_error: status >= 400,
                    metadata: json!({ "status": status }),
                })
            }
            Err(e) => Ok(ToolResult::error(
                format!("Fetch failed: {e}"),
                format!("web_fetch: {url}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let result = WebFetchTool::new()
            .execute(json!({ "url": "file:///etc/passwd" }), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
