use anyhow::{Context, Result as AnyResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::SessionManager;
use crate::config::{Config, DebugMode};
use crate::error::{Result, SessionError};
use crate::middleware::{BearerAuth, Pipeline, RequestTrace, RetryOnUnauthorized};

/// Body attached to an outgoing request
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
    Text(String),
}

/// Caller-supplied parts of a request; the authorization header is managed
/// by the pipeline and overrides whatever is set here
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: HeaderMap,
    body: Option<RequestBody>,
    query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// HTTP client for the ProjectHub API.
/// Every call runs through the request pipeline, which attaches the session
/// token and recovers from a rejected token once.
pub struct ApiClient {
    /// Stages plus the pooled transport
    pipeline: Pipeline,

    /// Session whose token is attached to requests
    session: Arc<SessionManager>,

    /// API base URL, shared with the session
    base_url: String,
}

impl ApiClient {
    /// Create a new API client with the default pipeline
    pub fn new(
        session: Arc<SessionManager>,
        connect_timeout: u64,
        request_timeout: u64,
        debug_mode: DebugMode,
    ) -> AnyResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let pipeline = Self::default_pipeline(client, session.clone(), debug_mode);
        Ok(Self::with_pipeline(session, pipeline))
    }

    /// Create an API client from loaded configuration
    pub fn from_config(config: &Config, session: Arc<SessionManager>) -> AnyResult<Self> {
        Self::new(
            session,
            config.http_connect_timeout,
            config.http_request_timeout,
            config.debug_mode,
        )
    }

    /// Create an API client around a custom pipeline
    pub fn with_pipeline(session: Arc<SessionManager>, pipeline: Pipeline) -> Self {
        let base_url = session.base_url().to_string();
        Self {
            pipeline,
            session,
            base_url,
        }
    }

    /// Request trace, then bearer header, then refresh-and-retry
    pub fn default_pipeline(
        client: Client,
        session: Arc<SessionManager>,
        debug_mode: DebugMode,
    ) -> Pipeline {
        Pipeline::builder(client)
            .stage(RequestTrace::new(debug_mode))
            .stage(BearerAuth::new(session.clone()))
            .stage(RetryOnUnauthorized::new(session))
            .build()
    }

    /// Send a request to `target`, a path under the base URL or an absolute URL.
    ///
    /// Non-2xx responses are returned as responses; only transport failures
    /// and unbuildable requests are errors.
    pub async fn request(
        &self,
        method: Method,
        target: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let RequestOptions {
            headers,
            body,
            query,
        } = options;

        let mut builder = self
            .pipeline
            .client()
            .request(method, self.url(target))
            .headers(headers);

        if !query.is_empty() {
            builder = builder.query(&query);
        }

        builder = match body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Form(fields)) => builder.form(&fields),
            Some(RequestBody::Text(text)) => builder.body(text),
            None => builder,
        };

        let request = builder
            .build()
            .map_err(|e| SessionError::Internal(anyhow::anyhow!("Failed to build request: {}", e)))?;

        self.pipeline.execute(request).await
    }

    pub async fn get(&self, target: &str) -> Result<Response> {
        self.request(Method::GET, target, RequestOptions::new()).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, target: &str, body: &T) -> Result<Response> {
        let value = to_json(body)?;
        self.request(Method::POST, target, RequestOptions::new().json(value)).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, target: &str, body: &T) -> Result<Response> {
        let value = to_json(body)?;
        self.request(Method::PUT, target, RequestOptions::new().json(value)).await
    }

    pub async fn delete(&self, target: &str) -> Result<Response> {
        self.request(Method::DELETE, target, RequestOptions::new()).await
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Absolute URL for `target`
    pub fn url(&self, target: &str) -> String {
        resolve_url(&self.base_url, target)
    }
}

fn to_json<T: Serialize + ?Sized>(body: &T) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|e| SessionError::Internal(anyhow::anyhow!("Failed to encode request body: {}", e)))
}

/// Join `target` onto `base` with exactly one slash; absolute http(s)
/// targets are returned unchanged
pub fn resolve_url(base: &str, target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }

    let base = base.trim_end_matches('/');
    let path = target.trim_start_matches('/');

    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
