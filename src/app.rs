#![cfg(not(tarpaulin_include))]

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Duration, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{DEFAULT_SECRET, ServeConfig};
use crate::downloader::{to_pdf, to_xlsx};
use crate::error::{AnalysisError, AuthError, ExportError, StoreError};
use crate::login::{
    AuthUser, SessionTable, UserDirectory, approve_user, handle_login, handle_logout, handle_me,
    handle_register, list_pending_users,
};
use crate::models::UploadReport;
use crate::pipeline::Analyzer;
use crate::store::{MemoryReportStore, ReportStore, SnapshotReportStore};

/// Everything request handlers share.
pub struct AppState {
    pub analyzer: Analyzer,
    pub reports: Arc<dyn ReportStore>,
    pub users: UserDirectory,
    pub sessions: SessionTable,
    pub model_path: PathBuf,
}

pub type SharedState = Arc<AppState>;

/// Router settings that come from configuration rather than state.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Error returned by every handler
///
/// The body is always `{"error": <kind>, "detail": <message>}` so clients can branch on
/// `error` and show `detail` to the user.
#[derive(Debug)]
pub enum ApiError {
    Analysis(AnalysisError),
    Auth(AuthError),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Analysis(e @ AnalysisError::Parse(_)) => (StatusCode::BAD_REQUEST, e.kind()),
            ApiError::Analysis(e @ AnalysisError::NoRecognizedParameters) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.kind())
            }
            ApiError::Auth(AuthError::UnknownUser(_)) | ApiError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "NotFound")
            }
            ApiError::Auth(AuthError::InvalidCredentials | AuthError::Unauthenticated) => {
                (StatusCode::UNAUTHORIZED, "AuthError")
            }
            ApiError::Auth(AuthError::Forbidden | AuthError::PendingApproval) => {
                (StatusCode::FORBIDDEN, "AuthError")
            }
            ApiError::Auth(AuthError::UsernameTaken | AuthError::InvalidInput(_))
            | ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Auth(AuthError::Storage(_)) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Analysis(e) => e.to_string(),
            ApiError::Auth(e) => e.to_string(),
            ApiError::NotFound(detail) | ApiError::BadRequest(detail) | ApiError::Internal(detail) => {
                detail.clone()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.parts();
        if status.is_server_error() {
            error!("{}", self.detail());
        }
        let body = ErrorBody {
            error: kind,
            detail: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        ApiError::Analysis(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Build the application router
///
/// # Arguments
/// * `state` - Shared application state
/// * `options` - CORS origins and the upload size limit
///
/// # Returns
/// * `Router` - Ready to be served, or driven directly in tests
pub fn router(state: SharedState, options: &RouterOptions) -> Router {
    let origins: Vec<HeaderValue> = options
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/ml/status", get(ml_status))
        .route("/api/auth/register", post(handle_register))
        .route("/api/auth/login", post(handle_login))
        .route("/api/auth/logout", post(handle_logout))
        .route("/api/auth/me", get(handle_me))
        .route("/api/admin/pending-users", get(list_pending_users))
        .route("/api/admin/users/:username/approve", post(approve_user))
        .route("/api/uploads/analyze", post(analyze_upload))
        .route("/api/reports", get(list_reports))
        .route("/api/reports/latest", get(latest_report))
        .route("/api/reports/latest/pdf", get(latest_report_pdf))
        .route("/api/reports/:id", get(get_report))
        .route("/api/reports/:id/pdf", get(report_pdf))
        .route("/api/reports/:id/xlsx", get(report_xlsx))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(options.max_upload_bytes)),
        )
        .with_state(state)
}

/// Start the HTTP server
///
/// Loads the analyzer, the report store and the user directory, provisions the
/// bootstrap administrator if one is configured, then serves until the process exits.
pub async fn run(config: ServeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let analyzer = Analyzer::bootstrap(
        config.analysis.analysis_config.as_deref(),
        &config.analysis.model_path,
    )?;

    let reports: Arc<dyn ReportStore> = match &config.snapshot {
        Some(path) => {
            let store = SnapshotReportStore::open(path, config.history_limit)?;
            info!("Persisting report history to {}", store.path().display());
            Arc::new(store)
        }
        None => Arc::new(MemoryReportStore::new(config.history_limit)),
    };

    if config.users.secret_key == DEFAULT_SECRET {
        warn!("Using the default secret key; set JWT_SECRET before exposing this server");
    }
    let users = UserDirectory::open(&config.users.database, &config.users.secret_key)?;
    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        users.provision_admin(username, password)?;
    }

    let state = Arc::new(AppState {
        analyzer,
        reports,
        users,
        sessions: SessionTable::new(Duration::hours(config.session_hours)),
        model_path: config.analysis.model_path.clone(),
    });
    let options = RouterOptions {
        allowed_origins: config.frontend_url.clone(),
        max_upload_bytes: config.max_upload_bytes(),
    };
    let app = router(state, &options);

    let listener = TcpListener::bind(&config.bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn ml_status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "model_loaded": state.analyzer.model().is_some(),
        "model_path": state.model_path.display().to_string(),
    }))
}

/// Analyze an uploaded lab report and store the result
///
/// Expects a multipart form with the file in a field named `file`. The report is only
/// stored once it has been fully assembled.
async fn analyze_upload(
    State(state): State<SharedState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadReport>, ApiError> {
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            upload = Some((filename, data.to_vec()));
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| ApiError::BadRequest("Missing multipart field 'file'".to_string()))?;

    let worker = Arc::clone(&state);
    let report = tokio::task::spawn_blocking(move || -> Result<Arc<UploadReport>, ApiError> {
        let report = worker
            .analyzer
            .analyze(&data, filename.as_deref(), &user.username)?;
        Ok(worker.reports.append(report)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    info!("Stored report {}", report.id);
    Ok(Json(report.as_ref().clone()))
}

async fn list_reports(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Json<Vec<Arc<UploadReport>>> {
    Json(state.reports.list())
}

async fn latest_report(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Json<Option<Arc<UploadReport>>> {
    Json(state.reports.latest())
}

async fn get_report(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Arc<UploadReport>>, ApiError> {
    find(&state, &id).map(Json)
}

async fn report_pdf(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    pdf_response(find(&state, &id)?).await
}

async fn latest_report_pdf(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Result<Response, ApiError> {
    let report = state
        .reports
        .latest()
        .ok_or_else(|| ApiError::NotFound("No reports have been uploaded yet".to_string()))?;
    pdf_response(report).await
}

async fn report_xlsx(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let report = find(&state, &id)?;
    let filename = format!("wq-report-{}.xlsx", report.id);
    let bytes = tokio::task::spawn_blocking(move || to_xlsx(&report))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(attachment(
        bytes,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        &filename,
    ))
}

fn find(state: &AppState, id: &str) -> Result<Arc<UploadReport>, ApiError> {
    state
        .reports
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("Report {} not found", id)))
}

async fn pdf_response(report: Arc<UploadReport>) -> Result<Response, ApiError> {
    let filename = format!("wq-report-{}.pdf", report.id);
    let bytes = tokio::task::spawn_blocking(move || to_pdf(&report))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(attachment(bytes, "application/pdf", &filename))
}

fn attachment(bytes: Vec<u8>, content_type: &str, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}
