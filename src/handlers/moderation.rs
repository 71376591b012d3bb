use axum::{
    extract::{Json, Path, State},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Actor;
use crate::entities::{course, instructor_profile};
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

type CourseResult = Result<Json<ApiResponse<course::Model>>, ServiceError>;
type InstructorResult = Result<Json<ApiResponse<instructor_profile::Model>>, ServiceError>;

async fn request_course_review(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    actor: Actor,
) -> CourseResult {
    let course = state
        .moderation
        .request_course_review(&actor, course_id)
        .await?;
    Ok(Json(ApiResponse::success(course)))
}

async fn approve_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    actor: Actor,
    body: Option<Json<ApproveRequest>>,
) -> CourseResult {
    let Json(request) = body.unwrap_or_default();
    let course = state
        .moderation
        .approve_course(&actor, course_id, request.notes.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(course)))
}

async fn reject_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    actor: Actor,
    Json(request): Json<RejectRequest>,
) -> CourseResult {
    let course = state
        .moderation
        .reject_course(&actor, course_id, &request.reason)
        .await?;
    Ok(Json(ApiResponse::success(course)))
}

async fn archive_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    actor: Actor,
) -> CourseResult {
    let course = state.moderation.archive_course(&actor, course_id).await?;
    Ok(Json(ApiResponse::success(course)))
}

async fn unarchive_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    actor: Actor,
) -> CourseResult {
    let course = state.moderation.unarchive_course(&actor, course_id).await?;
    Ok(Json(ApiResponse::success(course)))
}

async fn approve_instructor(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    actor: Actor,
    body: Option<Json<ApproveRequest>>,
) -> InstructorResult {
    let Json(request) = body.unwrap_or_default();
    let profile = state
        .moderation
        .approve_instructor(&actor, user_id, request.notes.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(profile)))
}

async fn reject_instructor(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    actor: Actor,
    Json(request): Json<RejectRequest>,
) -> InstructorResult {
    let profile = state
        .moderation
        .reject_instructor(&actor, user_id, &request.reason)
        .await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// Routes mounted under `/api/v1/courses`
pub fn course_routes() -> Router<AppState> {
    Router::new()
        .route("/:course_id/request-review", post(request_course_review))
        .route("/:course_id/approve", post(approve_course))
        .route("/:course_id/reject", post(reject_course))
        .route("/:course_id/archive", post(archive_course))
        .route("/:course_id/unarchive", post(unarchive_course))
}

/// Routes mounted under `/api/v1/instructors`
pub fn instructor_routes() -> Router<AppState> {
    Router::new()
        .route("/:user_id/approve", post(approve_instructor))
        .route("/:user_id/reject", post(reject_instructor))
}
