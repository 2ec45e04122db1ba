use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use kidpoints_shared::domain::KidId;
use kidpoints_shared::jwt::{self, SessionClaims};
use tracing::{error, warn};

use super::{AppError, AppState};
use crate::storage::models::{Kid, Parent};

/// How many days before mandatory re-login.
const SESSION_TTL_DAYS: i64 = 7;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: SessionClaims,
}

impl AuthCtx {
    /// Kid-scoped endpoints require a selected kid in the session; absence
    /// fails the request before it reaches the ledger.
    pub fn require_kid(&self) -> Result<i32, AppError> {
        match self.claims.kid_id {
            Some(kid) => Ok(kid.0),
            None => Err(AppError::unauthorized("no kid selected")),
        }
    }
}

pub async fn require_session(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized("authentication required"));
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val
        .to_str()
        .map_err(|_| AppError::unauthorized("authentication required"))?;
    let prefix = "Bearer ";
    if !header_str.starts_with(prefix) {
        return unauthorized();
    }
    let token = &header_str[prefix.len()..];

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: session token rejected");
            return Err(AppError::unauthorized("invalid session token"));
        }
    };

    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Claims for a freshly authenticated parent, optionally with a selected kid.
pub fn session_claims(parent: &Parent, kid: Option<&Kid>) -> SessionClaims {
    SessionClaims {
        sub: parent.email.clone(),
        parent_id: parent.id,
        parent_name: parent.name.clone(),
        kid_id: kid.map(|k| KidId(k.id)),
        kid_name: kid.map(|k| k.name.clone()),
        exp: session_expiry(),
    }
}

/// Re-issues claims with a different kid selection and a fresh expiry.
pub fn switched_claims(claims: &SessionClaims, kid: &Kid) -> SessionClaims {
    SessionClaims {
        sub: claims.sub.clone(),
        parent_id: claims.parent_id,
        parent_name: claims.parent_name.clone(),
        kid_id: Some(KidId(kid.id)),
        kid_name: Some(kid.name.clone()),
        exp: session_expiry(),
    }
}

pub fn sign_session(state: &AppState, claims: &SessionClaims) -> Result<String, AppError> {
    jwt::encode(claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(parent_id = claims.parent_id, error=%e, "auth: jwt encode failed");
        AppError::internal(e)
    })
}

fn session_expiry() -> i64 {
    (Utc::now() + Duration::days(SESSION_TTL_DAYS)).timestamp()
}
