// Request tracing stage
// Tags each exchange with a short request id and logs it according to DEBUG_MODE

use async_trait::async_trait;
use reqwest::{Request, Response};
use std::time::Instant;

use super::{Next, Stage};
use crate::config::DebugMode;
use crate::error::Result;

/// Logs every exchange passing through the pipeline.
///
/// Supports three modes:
/// - off: per-request detail at debug level only
/// - errors: non-2xx responses and transport failures at warn
/// - all: every exchange at info, failures at warn
pub struct RequestTrace {
    mode: DebugMode,
}

impl RequestTrace {
    pub fn new(mode: DebugMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl Stage for RequestTrace {
    fn name(&self) -> &'static str {
        "request_trace"
    }

    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let method = request.method().clone();
        let url = request.url().clone();
        let started = Instant::now();

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            url = %url,
            "Sending API request"
        );

        let result = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) if response.status().is_success() => {
                if self.mode == DebugMode::All {
                    tracing::info!(
                        request_id = %request_id,
                        method = %method,
                        url = %url,
                        status = response.status().as_u16(),
                        elapsed_ms,
                        "API request completed"
                    );
                } else {
                    tracing::debug!(
                        request_id = %request_id,
                        status = response.status().as_u16(),
                        elapsed_ms,
                        "API request completed"
                    );
                }
            }
            Ok(response) => {
                if self.mode == DebugMode::Off {
                    tracing::debug!(
                        request_id = %request_id,
                        status = response.status().as_u16(),
                        elapsed_ms,
                        "API request returned error status"
                    );
                } else {
                    tracing::warn!(
                        request_id = %request_id,
                        method = %method,
                        url = %url,
                        status = response.status().as_u16(),
                        elapsed_ms,
                        "API request returned error status"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    method = %method,
                    url = %url,
                    error = %e,
                    elapsed_ms,
                    "API request failed"
                );
            }
        }

        result
    }
}
