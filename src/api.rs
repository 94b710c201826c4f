// 🌐 REST API with Axum
//
// Routes mirror the frontend's expectations:
//   POST /profile/create-profile      GET /profile      GET /profile/:id
//   POST /loan/upload-csv             GET /loan/all-loans
//   POST /loan/tokenize-loans         GET /dashboard    GET /health

use crate::config::Config;
use crate::dashboard::{dashboard, DashboardStats};
use crate::entities::{NewProfile, Profile, ProfileRegistry, ProfileStore, SqliteProfileStore};
use crate::error::{ErrorKind, PlatformError};
use crate::import::{import_csv, ImportSummary};
use crate::loan::Loan;
use crate::store::{LoanStore, MemoryLoanStore, SqliteLoanStore};
use crate::tokenize::{tokenize_batch, TokenizeOutcome, TokenizeRequest};
use anyhow::Context;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection}, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub loans: Arc<dyn LoanStore>,
    pub profiles: Arc<dyn ProfileStore>,
}

impl AppState {
    /// Both stores over one SQLite connection
    pub fn sqlite(conn: Connection, import_chunk_size: usize) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        Self {
            loans: Arc::new(SqliteLoanStore::new(Arc::clone(&conn)).with_chunk_size(import_chunk_size)),
            profiles: Arc::new(SqliteProfileStore::new(conn)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            loans: Arc::new(MemoryLoanStore::new()),
            profiles: Arc::new(ProfileRegistry::new()),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error body: `{"statusCode", "error", "message"}` plus per-loan results for
/// a partially failed tokenize batch
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<TokenizeOutcome>>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    results: Option<Vec<TokenizeOutcome>>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            results: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

// Keeps the status axum picked (413 once the body limit is hit)
impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "request failed");
            "Internal server error".to_string()
        } else {
            err.to_string()
        };

        Self {
            status,
            message,
            results: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status_code: self.status.as_u16(),
            error: self.status.canonical_reason().unwrap_or("Error"),
            message: self.message,
            results: self.results,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Profile handlers
// ============================================================================

/// POST /profile/create-profile
async fn create_profile(
    State(state): State<AppState>,
    payload: Result<Json<NewProfile>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Profile>)> {
    let Json(new) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let profile = state.profiles.create(new)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// GET /profile
async fn list_profiles(State(state): State<AppState>) -> ApiResult<Json<Vec<Profile>>> {
    Ok(Json(state.profiles.find_all()?))
}

/// GET /profile/:id
async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Profile>> {
    Ok(Json(state.profiles.find_by_id(&id)?))
}

// ============================================================================
// Loan handlers
// ============================================================================

/// POST /loan/upload-csv (multipart, field `file`)
async fn upload_csv(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<ImportSummary>)> {
    let mut multipart = multipart?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            upload = Some(field.bytes().await?);
            break;
        }
    }

    let data = upload.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }

    let summary = import_csv(state.loans.as_ref(), &data)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /loan/all-loans
async fn all_loans(State(state): State<AppState>) -> ApiResult<Json<Vec<Loan>>> {
    Ok(Json(state.loans.find_all()?))
}

/// POST /loan/tokenize-loans, body `{loanId}` or `{loanIds}`
async fn tokenize_loans(
    State(state): State<AppState>,
    payload: Result<Json<TokenizeRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let ids = request.identifiers();
    if ids.is_empty() {
        return Err(ApiError::bad_request("No loan IDs provided"));
    }

    let report = tokenize_batch(state.loans.as_ref(), &ids)?;

    if let Some((id, reason)) = report.first_failure() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: format!("Failed to tokenize loan {}: {}", id, reason),
            results: Some(report.outcomes.clone()),
        });
    }

    let mut loans: Vec<Loan> = report.tokenized().into_iter().cloned().collect();
    let response = if loans.len() == 1 {
        (StatusCode::CREATED, Json(loans.remove(0))).into_response()
    } else {
        (StatusCode::CREATED, Json(loans)).into_response()
    };
    Ok(response)
}

// ============================================================================
// Dashboard + health
// ============================================================================

/// GET /dashboard
async fn get_dashboard(State(state): State<AppState>) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(dashboard(state.loans.as_ref())?))
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": crate::VERSION }))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState, config: &Config) -> anyhow::Result<Router> {
    let origin: HeaderValue = config
        .cors_origin
        .parse()
        .with_context(|| format!("invalid CORS origin: {}", config.cors_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let profile_routes = Router::new()
        .route("/", get(list_profiles))
        .route("/create-profile", post(create_profile))
        .route("/:id", get(get_profile));

    let loan_routes = Router::new()
        .route("/upload-csv", post(upload_csv))
        .route("/all-loans", get(all_loans))
        .route("/tokenize-loans", post(tokenize_loans));

    Ok(Router::new()
        .route("/health", get(health_check))
        .route("/dashboard", get(get_dashboard))
        .nest("/profile", profile_routes)
        .nest("/loan", loan_routes)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}
