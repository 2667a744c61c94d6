//! Trusted-header authentication.
//!
//! Nothing here verifies the header's authenticity — that's delegated to
//! whatever sits in front of this service (a reverse proxy, a service
//! mesh sidecar). This extractor only reads the username the caller
//! claims and hands it to handlers for the `WorkflowRun.user` ownership
//! check.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

pub struct AuthContext {
    pub user: String,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get("X-Jobmon-User")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or((StatusCode::UNAUTHORIZED, "missing X-Jobmon-User header"))?;

        Ok(AuthContext { user })
    }
}

/// Enforce that `user` matches the current run's owner.
pub fn require_owner(user: &str, run_owner: &str) -> Result<(), crate::error::ApiError> {
    if user != run_owner {
        return Err(engine::EngineError::Unauthorized(format!(
            "caller '{user}' does not own the current run (owned by '{run_owner}')"
        ))
        .into());
    }
    Ok(())
}
