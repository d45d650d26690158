// Bearer credential stage

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response};
use std::sync::Arc;

use super::{Next, Stage};
use crate::auth::SessionManager;
use crate::error::{Result, SessionError};

/// Attaches `Authorization: Bearer <token>` whenever the session holds a
/// token, replacing any authorization header the caller set. Without a token
/// the request is left untouched.
pub struct BearerAuth {
    session: Arc<SessionManager>,
}

impl BearerAuth {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Stage for BearerAuth {
    fn name(&self) -> &'static str {
        "bearer_auth"
    }

    async fn handle(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
        if let Some(token) = self.session.token().await {
            set_bearer(&mut request, &token)?;
        }
        next.run(request).await
    }
}

/// Set the bearer authorization header on `request`
pub(crate) fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        SessionError::MalformedToken("token contains characters not allowed in headers".to_string())
    })?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Token carried by the request's bearer authorization header, if any
pub(crate) fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
