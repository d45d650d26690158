// Request pipeline: ordered stages wrapped around the HTTP transport
//
// Every API call runs through the same list of stages. Each stage gets the
// request and a `Next` continuation; the end of the list is the transport.

pub mod auth;
pub mod debug;
pub mod retry;

use async_trait::async_trait;
use reqwest::{Client, Request, Response};
use std::sync::Arc;

use crate::error::{Result, SessionError};

pub use auth::BearerAuth;
pub use debug::RequestTrace;
pub use retry::RetryOnUnauthorized;

/// One step of the request pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name; a pipeline holds at most one stage per name
    fn name(&self) -> &'static str;

    /// Process `request`, usually by calling `next.run` once or more
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response>;
}

/// The remainder of the pipeline after the current stage
#[derive(Clone, Copy)]
pub struct Next<'a> {
    client: &'a Client,
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    /// Hand the request to the next stage, or send it when none are left
    pub async fn run(self, request: Request) -> Result<Response> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    client: self.client,
                    stages: rest,
                };
                stage.handle(request, next).await
            }
            None => self
                .client
                .execute(request)
                .await
                .map_err(|e| SessionError::network(&e)),
        }
    }
}

/// Stages plus the transport, built once and shared by every caller
pub struct Pipeline {
    client: Client,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn builder(client: Client) -> PipelineBuilder {
        PipelineBuilder {
            client,
            stages: Vec::new(),
        }
    }

    /// Run `request` through every stage in order
    pub async fn execute(&self, request: Request) -> Result<Response> {
        Next {
            client: &self.client,
            stages: &self.stages,
        }
        .run(request)
        .await
    }

    /// Underlying transport client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Installed stage names, outermost first
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Builder for `Pipeline`; installing a stage twice keeps the first one
pub struct PipelineBuilder {
    client: Client,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    /// Append a stage (it will run inside the stages added before it)
    pub fn stage<S: Stage + 'static>(self, stage: S) -> Self {
        self.shared_stage(Arc::new(stage))
    }

    pub fn shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        if self.stages.iter().any(|s| s.name() == stage.name()) {
            tracing::debug!("Stage '{}' already installed, ignoring", stage.name());
            return self;
        }
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            client: self.client,
            stages: self.stages,
        }
    }
}
