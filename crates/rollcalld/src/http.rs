//! HTTP surface: kiosk check-in endpoints and the attendance API.

use crate::engine::{EngineError, EngineHandle};
use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use rollcall_core::report::{export_csv, school_days, AttendanceStats, SchoolDay, StudentAttendance};
use rollcall_core::types::RecorderId;
use rollcall_core::{
    decode_capture, AttendanceEvent, AttendanceStatus, CheckInContext, EnrollRequest, ErrorKind,
    Orientation, PersonName, PipelineConfig, PipelineError, RecognitionOutcome, RoomId, SectionId,
    SubjectId,
};
use rollcall_store::{Database, DbError, FsImageStore};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Three base64 captures comfortably fit.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub db: Arc<Database>,
    pub images: Arc<FsImageStore>,
    pub pipeline: Arc<PipelineConfig>,
    pub allowed_kiosk_ips: Arc<Vec<IpAddr>>,
}

pub fn router(state: AppState) -> Router {
    let kiosk = Router::new()
        .route("/check-face", post(check_face))
        .route("/register", post(register))
        .route("/recognize", post(recognize))
        .route("/rooms", get(rooms))
        .route("/subjects", get(subjects))
        .route("/face/:filename", get(face_image))
        .route_layer(middleware::from_fn_with_state(state.clone(), kiosk_guard));

    Router::new()
        .nest("/attendance-login/api", kiosk)
        .route("/api/attendance", get(monthly_attendance).post(mark_attendance))
        .route("/api/attendance/stats", get(statistics))
        .route("/api/attendance/export", get(export))
        .route("/api/attendance/generate", post(generate))
        .route("/health", get(|| async { "OK" }))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Run a blocking database call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, DbError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(ApiError::from)
}

// ---- kiosk allowlist ----

fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };
    header_ip("x-forwarded-for")
        .or_else(|| header_ip("x-real-ip"))
        .or_else(|| header_ip("cf-connecting-ip"))
        .or(peer)
}

async fn kiosk_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.allowed_kiosk_ips.is_empty() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    match client_ip(request.headers(), peer) {
        Some(ip) if state.allowed_kiosk_ips.contains(&ip) => next.run(request).await,
        ip => {
            tracing::warn!(client_ip = ?ip, path = %request.uri().path(), "kiosk request from unlisted client");
            ApiError::Forbidden.into_response()
        }
    }
}

// ---- kiosk endpoints ----

#[derive(Deserialize)]
struct ImagePayload {
    image: String,
}

#[derive(Serialize)]
struct CheckFaceResponse {
    face_detected: bool,
    orientation: Option<Orientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    message: String,
}

async fn check_face(
    State(state): State<AppState>,
    Json(payload): Json<ImagePayload>,
) -> Result<Json<CheckFaceResponse>, ApiError> {
    let image = decode_capture(&payload.image)?;
    let response = match state.engine.check_face(image).await {
        Some(orientation) => CheckFaceResponse {
            face_detected: true,
            orientation: Some(orientation),
            kind: None,
            message: "Face detected.".into(),
        },
        None => CheckFaceResponse {
            face_detected: false,
            orientation: None,
            kind: Some(ErrorKind::NoFaceDetected),
            message: "No face detected. Please face the camera.".into(),
        },
    };
    Ok(Json(response))
}

#[derive(Deserialize)]
struct RegisterPayload {
    student_id: String,
    first_name: String,
    #[serde(default)]
    middle_name: Option<String>,
    last_name: String,
    images: Vec<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    person_id: String,
    embeddings: usize,
    message: String,
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("register", %request_id, student_id = %payload.student_id);

    async move {
        let student_id = payload.student_id.trim().to_string();
        if student_id.is_empty() {
            return Err(ApiError::BadRequest("student_id is required".into()));
        }
        // Unknown students are rejected before any image is decoded.
        let known = {
            let db = state.db.clone();
            let id = student_id.clone();
            blocking(move || db.get_student(&id).map(|s| s.is_some())).await?
        };
        if !known {
            return Err(EngineError::from(PipelineError::InvalidIdentity(student_id)).into());
        }
        let images = payload
            .images
            .iter()
            .map(|image| decode_capture(image))
            .collect::<Result<Vec<_>, _>>()?;
        let name = PersonName {
            first: payload.first_name,
            middle: payload.middle_name.filter(|m| !m.trim().is_empty()),
            last: payload.last_name,
        };
        let display = name.to_string();

        let outcome = state
            .engine
            .enroll(EnrollRequest {
                person_id: student_id,
                name,
                images,
            })
            .await?;

        Ok((
            StatusCode::CREATED,
            Json(RegisterResponse {
                message: format!("Registered {display}."),
                person_id: outcome.person_id,
                embeddings: outcome.embeddings,
            }),
        ))
    }
    .instrument(span)
    .await
}

#[derive(Deserialize)]
struct RecognizePayload {
    image: String,
    room_id: RoomId,
    subject_id: SubjectId,
}

#[derive(Serialize)]
struct RecognizeResponse {
    #[serde(flatten)]
    outcome: RecognitionOutcome,
    kind: Option<ErrorKind>,
    message: String,
}

async fn recognize(
    State(state): State<AppState>,
    Json(payload): Json<RecognizePayload>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "recognize",
        %request_id,
        room_id = payload.room_id,
        subject_id = payload.subject_id
    );

    async move {
        let image = decode_capture(&payload.image)?;
        let context = CheckInContext {
            room_id: payload.room_id,
            subject_id: payload.subject_id,
        };
        let outcome = state.engine.recognize(image, context).await;
        Ok(Json(RecognizeResponse {
            kind: outcome.kind(),
            message: outcome.message(),
            outcome,
        }))
    }
    .instrument(span)
    .await
}

async fn rooms(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rooms = blocking(move || state.db.list_rooms()).await?;
    Ok(Json(serde_json::json!({ "rooms": rooms })))
}

async fn subjects(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let subjects = blocking(move || state.db.list_subjects()).await?;
    Ok(Json(serde_json::json!({ "subjects": subjects })))
}

async fn face_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (bytes, mime) = blocking(move || state.images.read(&filename)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "public, max-age=31536000"),
        ],
        bytes,
    ))
}

// ---- attendance API ----

#[derive(Debug, Clone, Copy, Deserialize)]
struct MonthQuery {
    section_id: SectionId,
    subject_id: SubjectId,
    year: i32,
    month: u32,
}

#[derive(Serialize)]
struct StudentRow {
    #[serde(flatten)]
    attendance: StudentAttendance,
    stats: AttendanceStats,
}

#[derive(Serialize)]
struct MonthlyAttendance {
    days: Vec<SchoolDay>,
    students: Vec<StudentRow>,
}

async fn monthly_attendance(
    State(state): State<AppState>,
    Query(q): Query<MonthQuery>,
) -> Result<Json<MonthlyAttendance>, ApiError> {
    let rows = blocking(move || state.db.monthly_records(q.section_id, q.subject_id, q.year, q.month)).await?;
    Ok(Json(MonthlyAttendance {
        days: school_days(q.year, q.month),
        students: rows
            .into_iter()
            .map(|attendance| StudentRow {
                stats: attendance.stats(),
                attendance,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct ManualMark {
    student_id: String,
    subject_id: SubjectId,
    section_id: SectionId,
    date: NaiveDate,
    status: String,
    #[serde(default)]
    recorded_by: Option<RecorderId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManualBody {
    Many { records: Vec<ManualMark> },
    One(ManualMark),
}

async fn mark_attendance(
    State(state): State<AppState>,
    Json(body): Json<ManualBody>,
) -> Result<impl IntoResponse, ApiError> {
    let marks = match body {
        ManualBody::Many { records } => records,
        ManualBody::One(mark) => vec![mark],
    };
    let now = Local::now().naive_local();
    let events = marks
        .into_iter()
        .map(|mark| {
            let status: AttendanceStatus = mark
                .status
                .parse()
                .map_err(|err: rollcall_core::types::UnknownStatus| ApiError::BadRequest(err.to_string()))?;
            Ok(AttendanceEvent {
                person_id: mark.student_id,
                subject_id: mark.subject_id,
                section_id: mark.section_id,
                date: mark.date,
                status,
                recorded_by: mark.recorded_by.unwrap_or(state.pipeline.system_recorder_id),
                recorded_at: now,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let updated = blocking(move || state.db.bulk_upsert(&events)).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn statistics(
    State(state): State<AppState>,
    Query(q): Query<MonthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = blocking(move || state.db.statistics(q.section_id, q.subject_id, q.year, q.month)).await?;
    Ok(Json(stats))
}

async fn export(
    State(state): State<AppState>,
    Query(q): Query<MonthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filename = format!(
        "attendance_{}_{}_{}-{:02}.csv",
        q.section_id, q.subject_id, q.year, q.month
    );
    let rows = blocking(move || state.db.monthly_records(q.section_id, q.subject_id, q.year, q.month)).await?;
    let csv = export_csv(&rows, &school_days(q.year, q.month));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        csv,
    ))
}

#[derive(Deserialize)]
struct GeneratePayload {
    #[serde(flatten)]
    month: MonthQuery,
    #[serde(default)]
    recorded_by: Option<RecorderId>,
}

async fn generate(
    State(state): State<AppState>,
    Json(payload): Json<GeneratePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let q = payload.month;
    let recorded_by = payload.recorded_by.unwrap_or(state.pipeline.system_recorder_id);
    let summary = blocking(move || {
        state
            .db
            .generate_month(q.section_id, q.subject_id, q.year, q.month, recorded_by)
    })
    .await?;
    Ok(Json(summary))
}
