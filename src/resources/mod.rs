// Resource clients
// Typed access to projects and their products through the authenticated API client

mod cache;
mod products;
mod projects;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::{error_message, opt_string_or_number, string_or_number};
use crate::error::{Result, SessionError};

pub use cache::{ProductCache, PRODUCT_CACHE_TTL};
pub use products::ProductsApi;
pub use projects::ProjectsApi;

/// A project as returned by `/projects`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    /// Fields this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A product as returned by `/projects/{id}/products`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    /// Owning project; always set on products returned by `ProductsApi::list`
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub project_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Create or update payload shared by projects and products.
/// Unset fields are left out so updates only touch what was given
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Draft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Draft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Map a non-2xx response to an error, passing successful ones through
pub(crate) async fn check_status(response: Response, fallback: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(SessionError::SessionExpired),
        StatusCode::FORBIDDEN => Err(SessionError::Forbidden(
            error_message(response, "Forbidden").await,
        )),
        _ => Err(SessionError::Api {
            status: status.as_u16(),
            message: error_message(response, fallback).await,
        }),
    }
}

/// Check the status, then decode the JSON body.
///
/// A body that arrives but does not decode is an API fault, not a
/// transport one.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, fallback: &str) -> Result<T> {
    let response = check_status(response, fallback).await?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| SessionError::network(&e))?;

    serde_json::from_slice(&body).map_err(|e| SessionError::Api {
        status: status.as_u16(),
        message: format!("Invalid response body: {}", e),
    })
}
