// Refresh-and-retry on 401

use async_trait::async_trait;
use reqwest::{Request, Response, StatusCode};
use std::sync::Arc;

use super::auth::{bearer_token, set_bearer};
use super::{Next, Stage};
use crate::auth::SessionManager;
use crate::error::Result;

/// On `401 Unauthorized`, asks the session for a refreshed token once and
/// re-sends the request once with it.
///
/// When the refresh fails the session is signed out and the original 401 is
/// returned; a 401 on the retry is returned as-is. Must run inside
/// `BearerAuth` so the rejected token can be read off the request.
pub struct RetryOnUnauthorized {
    session: Arc<SessionManager>,
}

impl RetryOnUnauthorized {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Stage for RetryOnUnauthorized {
    fn name(&self) -> &'static str {
        "retry_on_unauthorized"
    }

    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let stale = bearer_token(&request);
        let retry = request.try_clone();
        let url = request.url().clone();

        let response = next.run(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut retry) = retry else {
            tracing::warn!(url = %url, "Received 401 for a streaming body, cannot retry");
            return Ok(response);
        };

        tracing::warn!(url = %url, "Received 401, refreshing token and retrying...");

        match self.session.refresh_rejected(stale.as_deref()).await {
            Ok(token) => {
                set_bearer(&mut retry, &token)?;
                tracing::debug!(url = %url, "Retrying with refreshed token");
                next.run(retry).await
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Token refresh failed, signing out");

                // A newer session may have replaced the rejected one meanwhile
                self.session
                    .clear_if_holding(stale.as_deref(), "refresh failed after 401")
                    .await;

                Ok(response)
            }
        }
    }
}
