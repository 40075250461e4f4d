//! HTTP surface of the portal.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::applications::ApplicationFilters;
use crate::auth::{ProfileUpdate, RegisterRequest};
use crate::document_store::collections;
use crate::input_validator::{ApplicationInput, ServiceInput};
use crate::log_query::LogFilters;
use crate::log_sink::LogLevel;
use crate::models::{ApplicationStatus, ServiceCategory};
use crate::security::CurrentUser;
use crate::timefmt;

type ApiResult<T> = Result<T, AppError>;

/// Build the portal router with every API route plus health checks
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // auth
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/password-reset", post(password_reset))
        .route("/api/auth/me", get(me).put(update_me))
        // services
        .route("/api/services", get(list_services).post(create_service))
        .route(
            "/api/services/{id}",
            get(get_service).put(update_service).delete(delete_service),
        )
        // applications
        .route("/api/applications", post(submit_application).get(list_my_applications))
        .route("/api/applications/{id}", get(get_application))
        .route("/api/applications/{id}/cancel", post(cancel_application))
        .route("/api/applications/{id}/status", put(update_application_status))
        // staff and admin
        .route("/api/admin/services", get(list_all_services))
        .route("/api/admin/applications", get(list_all_applications))
        .route("/api/admin/applications/stats", get(application_stats))
        .route("/api/admin/applications/bulk-status", post(bulk_status))
        .route("/api/admin/logs", get(query_logs))
        .route("/api/admin/logs/stats", get(log_stats))
        .route("/api/admin/logs/sweep", post(sweep_logs))
        // notifications
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", post(read_all_notifications))
        .route("/api/notifications/{id}/read", post(read_notification))
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn readyz(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    match state.store.get(collections::USERS, "readiness-probe").await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "ready": true, "store": state.store.name() })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ready": false, "store": state.store.name() })),
            )
        }
    }
}

// ---- auth ----

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct PasswordResetRequest {
    #[serde(default)]
    email: String,
}

async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let signed_in = state.auth.register(&req).await?;
    Ok((StatusCode::CREATED, Json(signed_in)))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::bad_request("Email and password are required"));
    }
    Ok(Json(state.auth.login(&req.email, &req.password).await?))
}

async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<StatusCode> {
    state.auth.logout(&user.token, &user.uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn password_reset(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<impl IntoResponse> {
    state.auth.request_password_reset(&req.email).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "sent" }))))
}

async fn me(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.auth.profile(&user.uid).await?))
}

async fn update_me(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.auth.update_profile(&user.uid, &update).await?))
}

// ---- services ----

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceListParams {
    category: Option<String>,
    search: Option<String>,
}

fn parse_category(raw: Option<&str>) -> ApiResult<Option<ServiceCategory>> {
    raw.filter(|c| !c.is_empty())
        .map(ServiceCategory::from_str)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))
}

async fn list_services(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ServiceListParams>,
) -> ApiResult<impl IntoResponse> {
    let category = parse_category(params.category.as_deref())?;
    let services = match params.search.as_deref() {
        Some(term) if !term.trim().is_empty() => state
            .services
            .search(term, true)
            .await?
            .into_iter()
            .filter(|s| category.map_or(true, |c| s.category == c))
            .collect(),
        _ => state.services.list(category, true).await?,
    };
    Ok(Json(services))
}

async fn list_all_services(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<ServiceListParams>,
) -> ApiResult<impl IntoResponse> {
    user.require_admin()?;
    let category = parse_category(params.category.as_deref())?;
    Ok(Json(state.services.list(category, false).await?))
}

async fn get_service(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let service = state.services.get(&id).await?;
    if !service.is_active {
        return Err(AppError::not_found(format!("service '{id}' not found")));
    }
    Ok(Json(service))
}

async fn create_service(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Json(input): Json<ServiceInput>,
) -> ApiResult<impl IntoResponse> {
    let service = state.services.create(&user.actor(), &input).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn update_service(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<ServiceInput>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.services.update(&user.actor(), &id, &input).await?))
}

async fn delete_service(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.services.deactivate(&user.actor(), &id).await?))
}

// ---- applications ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApplicationListParams {
    status: Option<String>,
    service_id: Option<String>,
    limit: Option<usize>,
}

fn parse_status(raw: Option<&str>) -> ApiResult<Option<ApplicationStatus>> {
    raw.filter(|s| !s.is_empty())
        .map(ApplicationStatus::from_str)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CancelRequest {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    #[serde(default)]
    status: String,
    #[serde(default)]
    comments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkStatusRequest {
    #[serde(default)]
    application_ids: Vec<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    comments: Option<String>,
}

async fn submit_application(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Json(input): Json<ApplicationInput>,
) -> ApiResult<impl IntoResponse> {
    let application = state.applications.submit(&user.actor(), &input).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn list_my_applications(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<ApplicationListParams>,
) -> ApiResult<impl IntoResponse> {
    let status = parse_status(params.status.as_deref())?;
    Ok(Json(state.applications.list_own(&user.actor(), status).await?))
}

async fn get_application(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.applications.get(&user.actor(), &id).await?))
}

// The body is optional; an empty request cancels without a reason
async fn cancel_application(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let req: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::bad_request(e.to_string()))?
    };
    let application = state
        .applications
        .cancel(&user.actor(), &id, req.reason.as_deref())
        .await?;
    Ok(Json(application))
}

async fn update_application_status(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    let application = state
        .applications
        .update_status(&user.actor(), &id, &req.status, req.comments.as_deref())
        .await?;
    Ok(Json(application))
}

async fn list_all_applications(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<ApplicationListParams>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    let filters = ApplicationFilters {
        status: parse_status(params.status.as_deref())?,
        service_id: params.service_id,
        limit: params.limit,
    };
    Ok(Json(state.applications.list_all(&user.actor(), &filters).await?))
}

async fn application_stats(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    Ok(Json(state.applications.statistics(&user.actor()).await?))
}

async fn bulk_status(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<BulkStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_staff()?;
    if req.application_ids.is_empty() {
        return Err(AppError::bad_request("Missing required fields: applicationIds"));
    }
    let results = state
        .applications
        .bulk_update_status(
            &user.actor(),
            &req.application_ids,
            &req.status,
            req.comments.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "results": results })))
}

// ---- notifications ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NotificationParams {
    unread_only: bool,
    limit: Option<usize>,
}

async fn list_notifications(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<NotificationParams>,
) -> ApiResult<impl IntoResponse> {
    let notifications = state
        .notifications
        .list_for_user(&user.uid, params.unread_only, params.limit)
        .await?;
    let unread = state.notifications.unread_count(&user.uid).await?;
    Ok(Json(json!({ "notifications": notifications, "unreadCount": unread })))
}

async fn read_notification(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.notifications.mark_read(&user.uid, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_all_notifications(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let updated = state.notifications.mark_all_read(&user.uid).await?;
    Ok(Json(json!({ "updated": updated })))
}

// ---- logs ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LogParams {
    level: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<usize>,
}

const DEFAULT_LOG_LIMIT: usize = 100;

fn parse_date(raw: Option<&str>, name: &str) -> ApiResult<Option<DateTime<Utc>>> {
    match raw.filter(|d| !d.is_empty()) {
        Some(d) => timefmt::parse(d)
            .map(Some)
            .ok_or_else(|| AppError::bad_request(format!("Invalid {name}: {d}"))),
        None => Ok(None),
    }
}

impl LogParams {
    fn filters(&self) -> ApiResult<LogFilters> {
        let level = match self.level.as_deref().filter(|l| !l.is_empty()) {
            Some(raw) => Some(
                LogLevel::from_str(raw)
                    .map_err(|_| AppError::bad_request(format!("Invalid log level: {raw}")))?,
            ),
            None => None,
        };
        Ok(LogFilters {
            level,
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            start_date: parse_date(self.start_date.as_deref(), "startDate")?,
            end_date: parse_date(self.end_date.as_deref(), "endDate")?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SweepRequest {
    days_to_keep: u32,
}

async fn query_logs(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<LogParams>,
) -> ApiResult<impl IntoResponse> {
    user.require_admin()?;
    let filters = params.filters()?;
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(state.logs.query(&filters, limit).await?))
}

async fn log_stats(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<LogParams>,
) -> ApiResult<impl IntoResponse> {
    user.require_admin()?;
    Ok(Json(state.logs.statistics(&params.filters()?).await?))
}

async fn sweep_logs(
    Extension(state): Extension<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<SweepRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require_admin()?;
    // Make sure buffered entries are on disk before deciding what is stale
    state.logger.flush().await;
    let removed = state.logs.retention_sweep(req.days_to_keep).await?;
    state.logger.user_action(
        "Log retention sweep",
        Some(json!({ "daysToKeep": req.days_to_keep, "removed": removed })),
        Some(crate::event_logger::user_context(&user.uid)),
    );
    Ok(Json(json!({ "removed": removed })))
}
