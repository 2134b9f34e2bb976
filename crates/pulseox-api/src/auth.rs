//! Authentication: bearer middleware and device-credential checks.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use async_trait::async_trait;
use std::time::Duration;

use pulseox_core::{AuthUser, Error, IdentityVerifier, Result, UserIdentity};

use crate::error::ApiError;
use crate::server::ServerState;

/// Verify the bearer token and stash the caller identity as a request
/// extension for the handlers.
pub async fn bearer_auth_middleware(
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing or invalid authorization header"))?;

    let user = state.identity.verify(token).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Authenticate a device-posted request from its headers.
///
/// Unknown device and wrong secret both surface as `Unauthorized`; this
/// path never reveals whether a device id exists.
pub fn authenticate_device(state: &ServerState, headers: &HeaderMap) -> Result<String> {
    let device_id = header_str(headers, "x-device-id")?;
    let secret = header_str(headers, "x-device-secret")?;

    match state.registry.device(&device_id)? {
        Some(device) if device.secret == secret => Ok(device_id),
        _ => Err(Error::Unauthorized("invalid device credentials".into())),
    }
}

/// Optional explicit user header on device posts.
pub fn optional_user_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or_else(|| Error::Unauthorized(format!("missing {name} header")))
}

/// Identity verifier backed by an HTTP identity service.
///
/// `GET {endpoint}/verify` with the bearer token returns the caller
/// identity; `GET {endpoint}/users?email=` and `GET {endpoint}/users/{uid}`
/// resolve directory lookups.
pub struct HttpIdentityVerifier {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpIdentityVerifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn lookup(&self, url: String) -> Result<Option<UserIdentity>> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("identity service unreachable: {e}")))?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let identity = response
                    .json::<UserIdentity>()
                    .await
                    .map_err(|e| Error::Upstream(format!("identity response malformed: {e}")))?;
                Ok(Some(identity))
            }
            status => Err(Error::Upstream(format!(
                "identity service returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser> {
        let response = self
            .client
            .get(format!("{}/verify", self.endpoint))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("identity service unreachable: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized("invalid token".into()));
        }
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "identity service returned {}",
                response.status()
            )));
        }
        response
            .json::<AuthUser>()
            .await
            .map_err(|e| Error::Upstream(format!("identity response malformed: {e}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserIdentity>> {
        let url = format!("{}/users?email={}", self.endpoint, email);
        self.lookup(url).await
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Option<UserIdentity>> {
        let url = format!("{}/users/{}", self.endpoint, uid);
        self.lookup(url).await
    }
}
