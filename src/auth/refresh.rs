// Calls against the authentication endpoints
//
// These go straight to the transport client: they must not pass through the
// request pipeline, whose 401 handling would recurse into refresh.

use reqwest::{header, Client, Response};

use super::types::{Registration, TokenResponse, UserProfile};
use crate::error::{extract_detail, Result, SessionError};
use crate::http_client::resolve_url;

pub(crate) const TOKEN_PATH: &str = "auth/token";
pub(crate) const REGISTER_PATH: &str = "auth/register";
pub(crate) const PROFILE_PATH: &str = "auth/me";

/// Exchange username and password for a token
pub async fn request_token(
    client: &Client,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<String> {
    tracing::debug!("Requesting token for {}", username);

    let form = [("username", username), ("password", password)];
    let response = client
        .post(resolve_url(base_url, TOKEN_PATH))
        .form(&form)
        .send()
        .await
        .map_err(|e| SessionError::network(&e))?;

    let status = response.status();
    if !status.is_success() {
        let message = error_message(response, "Failed to sign in").await;
        tracing::warn!("Sign-in rejected: status={}, detail={}", status, message);
        return Err(if status.is_server_error() {
            SessionError::Api {
                status: status.as_u16(),
                message,
            }
        } else {
            SessionError::InvalidCredential(message)
        });
    }

    read_access_token(response).await
}

/// Create an account and receive its first token
pub async fn register(client: &Client, base_url: &str, profile: &Registration) -> Result<String> {
    tracing::debug!("Registering {}", profile.email);

    let response = client
        .post(resolve_url(base_url, REGISTER_PATH))
        .json(profile)
        .send()
        .await
        .map_err(|e| SessionError::network(&e))?;

    let status = response.status();
    if !status.is_success() {
        let message = error_message(response, "Failed to register").await;
        tracing::warn!("Registration rejected: status={}, detail={}", status, message);
        return Err(if status.is_server_error() {
            SessionError::Api {
                status: status.as_u16(),
                message,
            }
        } else {
            SessionError::ValidationError(message)
        });
    }

    read_access_token(response).await
}

/// Exchange the current token for a fresh one
pub async fn refresh(client: &Client, base_url: &str, current_token: &str) -> Result<String> {
    tracing::info!("Refreshing access token...");

    let response = client
        .post(resolve_url(base_url, TOKEN_PATH))
        .bearer_auth(current_token)
        .send()
        .await
        .map_err(|e| SessionError::network(&e))?;

    let status = response.status();
    if !status.is_success() {
        let message = error_message(response, status.canonical_reason().unwrap_or("refused")).await;
        tracing::error!("Token refresh failed: status={}, detail={}", status, message);
        return Err(SessionError::RefreshDenied(message));
    }

    read_access_token(response).await
}

/// Load the profile belonging to `token`
pub async fn fetch_profile(client: &Client, base_url: &str, token: &str) -> Result<UserProfile> {
    let response = client
        .get(resolve_url(base_url, PROFILE_PATH))
        .bearer_auth(token)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| SessionError::ProfileFetchFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("request failed");
        let message = error_message(response, reason).await;
        return Err(SessionError::ProfileFetchFailed(format!(
            "{} - {}",
            status.as_u16(),
            message
        )));
    }

    response
        .json::<UserProfile>()
        .await
        .map_err(|e| SessionError::ProfileFetchFailed(format!("invalid profile body: {}", e)))
}

async fn read_access_token(response: Response) -> Result<String> {
    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| SessionError::MalformedToken(format!("invalid token response: {}", e)))?;

    if data.access_token.is_empty() {
        return Err(SessionError::MalformedToken(
            "response does not contain access_token".to_string(),
        ));
    }

    Ok(data.access_token)
}

/// Error text from a non-2xx response: its `detail`, else `fallback`
pub(crate) async fn error_message(response: Response, fallback: &str) -> String {
    let body = response.text().await.unwrap_or_default();
    extract_detail(&body).unwrap_or_else(|| fallback.to_string())
}

