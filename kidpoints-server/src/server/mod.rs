pub mod auth;
mod config;

use std::str::FromStr;

use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{get, post, put},
};
use bcrypt::verify;
use chrono::NaiveDateTime;
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span, warn};
use uuid::Uuid;

pub use config::{AppConfig, ConfigError};
use kidpoints_shared::api;
use kidpoints_shared::domain::{GoalId, KidId, TransactionKind};
use kidpoints_shared::jwt::SessionClaims;

use crate::server::auth::AuthCtx;
use crate::storage::{StorageError, models};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
}

impl AppState {
    pub fn new(config: AppConfig, store: crate::storage::Store) -> Self {
        Self { config, store }
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/auth/me", get(api_auth_me))
        .route("/kids", get(api_list_kids).post(api_create_kid))
        .route("/kids/{id}", put(api_update_kid).delete(api_delete_kid))
        .route("/kids/{id}/switch", post(api_switch_kid))
        .route("/points", post(api_apply_points))
        .route("/points/history", get(api_point_history))
        .route("/goals", get(api_list_goals).post(api_create_goal))
        .route("/goals/{id}/achieve", post(api_achieve_goal))
        .route("/stats", get(api_kid_stats))
        .with_state(state.clone())
        // Span fields sit inside the auth layer so AuthCtx is populated by
        // the time they are recorded
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            parent_id = tracing::field::Empty,
            kid_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/auth/register", post(api_auth_register))
        .route("/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    // Put into request extensions for trace layer & handlers
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    // API-only server; nothing is cacheable
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
    );

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("parent_id", tracing::field::display(auth.claims.parent_id));
        if let Some(kid) = auth.claims.kid_id {
            span.record("kid_id", tracing::field::display(kid));
        }
    }
    Ok(next.run(req).await)
}

// Auth endpoints

async fn api_auth_register(
    State(state): State<AppState>,
    Json(body): Json<api::RegisterReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let name = body.name.trim();
    let email = body.email.trim();
    if name.is_empty() || email.is_empty() || body.password.is_empty() || body.confirm_password.is_empty()
    {
        return Err(AppError::bad_request("all fields are required"));
    }
    if name.chars().count() < 2 {
        return Err(AppError::bad_request(
            "name must be at least 2 characters long",
        ));
    }
    if body.password.chars().count() < 6 {
        return Err(AppError::bad_request(
            "password must be at least 6 characters long",
        ));
    }
    if body.password != body.confirm_password {
        return Err(AppError::bad_request("passwords do not match"));
    }
    if EmailAddress::from_str(email).is_err() {
        return Err(AppError::bad_request("please enter a valid email address"));
    }

    let hash = bcrypt::hash(&body.password, bcrypt::DEFAULT_COST).map_err(AppError::internal)?;
    let parent = state.store.create_parent(name, email, &hash).await?;

    let claims = auth::session_claims(&parent, None);
    let token = auth::sign_session(&state, &claims)?;
    Ok(Json(api::AuthResp {
        token,
        session: session_dto(&claims),
    }))
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::LoginReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::unauthorized("email and password are required"));
    }
    let Some(parent) = state.store.find_parent_by_email(&body.email).await? else {
        warn!(email=%body.email, "login: unknown email");
        return Err(AppError::unauthorized("invalid credentials"));
    };
    if !verify(&body.password, &parent.password_hash).map_err(|e| {
        tracing::error!(email=%body.email, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        warn!(email=%body.email, "login: invalid password");
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let claims = auth::session_claims(&parent, None);
    let token = auth::sign_session(&state, &claims)?;
    Ok(Json(api::AuthResp {
        token,
        session: session_dto(&claims),
    }))
}

async fn api_auth_me(
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::SessionDto>, AppError> {
    Ok(Json(session_dto(&auth.claims)))
}

// Kid management

async fn api_list_kids(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::KidDto>>, AppError> {
    let rows = state.store.list_kids(auth.claims.parent_id).await?;
    Ok(Json(rows.into_iter().map(kid_dto).collect()))
}

async fn api_create_kid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateKidReq>,
) -> Result<Json<api::KidDto>, AppError> {
    let kid = state
        .store
        .create_kid(auth.claims.parent_id, &body.name, body.age)
        .await?;
    Ok(Json(kid_dto(kid)))
}

async fn api_update_kid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    Json(body): Json<api::UpdateKidReq>,
) -> Result<Json<api::KidDto>, AppError> {
    let kid = state
        .store
        .update_kid(id, auth.claims.parent_id, body.name.as_deref(), body.age)
        .await?;
    Ok(Json(kid_dto(kid)))
}

async fn api_delete_kid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.store.delete_kid(id, auth.claims.parent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_switch_kid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::AuthResp>, AppError> {
    let kid = state
        .store
        .get_kid(id, auth.claims.parent_id)
        .await?
        .ok_or_else(|| AppError::bad_request("kid not found"))?;

    let claims = auth::switched_claims(&auth.claims, &kid);
    let token = auth::sign_session(&state, &claims)?;
    Ok(Json(api::AuthResp {
        token,
        session: session_dto(&claims),
    }))
}

// Points & goals ledger

async fn api_apply_points(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::PointsReq>,
) -> Result<Json<api::PointTransactionDto>, AppError> {
    let kid = auth.require_kid()?;
    let kind: TransactionKind = body.kind.parse().map_err(|_| {
        AppError::bad_request("type must be either \"reward\" or \"penalty\"")
    })?;
    let created = state
        .store
        .apply_points(kid, body.points, &body.description, kind)
        .await?;
    Ok(Json(transaction_dto(created)?))
}

#[derive(Deserialize)]
struct HistoryOpts {
    limit: Option<i64>,
}

async fn api_point_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(opts): Query<HistoryOpts>,
) -> Result<Json<Vec<api::PointTransactionDto>>, AppError> {
    let kid = auth.require_kid()?;
    let rows = state
        .store
        .point_history(kid, opts.limit.unwrap_or(50))
        .await?;
    let items = rows
        .into_iter()
        .map(transaction_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

async fn api_create_goal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<api::CreateGoalReq>,
) -> Result<Json<api::GoalDto>, AppError> {
    let kid = auth.require_kid()?;
    let goal = state
        .store
        .create_goal(
            kid,
            &body.title,
            body.description.as_deref(),
            body.points_required,
        )
        .await?;
    Ok(Json(goal_dto(goal)))
}

async fn api_list_goals(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::GoalDto>>, AppError> {
    let kid = auth.require_kid()?;
    let rows = state.store.list_goals(kid).await?;
    Ok(Json(rows.into_iter().map(goal_dto).collect()))
}

async fn api_achieve_goal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::GoalDto>, AppError> {
    let kid = auth.require_kid()?;
    let goal = state.store.achieve_goal(id, kid).await?;
    Ok(Json(goal_dto(goal)))
}

async fn api_kid_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::KidStatsDto>, AppError> {
    let kid = auth.require_kid()?;
    let stats = state.store.kid_stats(kid).await?;
    Ok(Json(api::KidStatsDto {
        total_points: stats.total_points,
        total_rewards: stats.total_rewards,
        total_penalties: stats.total_penalties,
        goals_achieved: stats.goals_achieved,
        goals_total: stats.goals_total,
    }))
}

// DTO mapping

fn session_dto(claims: &SessionClaims) -> api::SessionDto {
    api::SessionDto {
        parent_id: claims.parent_id,
        parent_name: claims.parent_name.clone(),
        kid_id: claims.kid_id,
        kid_name: claims.kid_name.clone(),
    }
}

fn kid_dto(k: models::Kid) -> api::KidDto {
    api::KidDto {
        id: KidId(k.id),
        name: k.name,
        age: k.age,
        total_points: k.total_points,
        created_at: to_rfc3339(k.created_at),
    }
}

fn transaction_dto(t: models::PointTransaction) -> Result<api::PointTransactionDto, AppError> {
    // The CHECK constraint keeps kind to the two known values; anything
    // else means a corrupt row.
    let kind = t.kind.parse::<TransactionKind>().map_err(AppError::internal)?;
    Ok(api::PointTransactionDto {
        id: t.id,
        kid_id: KidId(t.kid_id),
        points: t.points,
        description: t.description,
        kind,
        created_at: to_rfc3339(t.created_at),
    })
}

fn goal_dto(g: models::Goal) -> api::GoalDto {
    api::GoalDto {
        id: GoalId(g.id),
        kid_id: KidId(g.kid_id),
        title: g.title,
        description: g.description,
        points_required: g.points_required,
        is_achieved: g.is_achieved,
        created_at: to_rfc3339(g.created_at),
        achieved_at: g.achieved_at.map(to_rfc3339),
    }
}

fn to_rfc3339(dt: NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(dt, chrono::Utc).to_rfc3339()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized<T: Into<String>>(msg: T) -> Self {
        Self::Unauthorized(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidInput(m) | StorageError::NotEligible(m) => Self::BadRequest(m),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m, "unauthorized", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
