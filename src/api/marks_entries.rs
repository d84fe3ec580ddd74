use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentActor;
use crate::core::state::AppState;
use crate::db::models::EntryKey;
use crate::schemas::marks::{
    EntryKeyPayload, MarksEntryResponse, MarksEntrySummary, RejectRequest, ReviewQuery,
};
use crate::services::entry_workflow::EntryAction;
use crate::services::marks_editor;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(lookup_entry))
        .route("/review", get(list_for_review))
        .route("/:entry_id", get(get_entry))
        .route("/:entry_id/approve", post(approve_entry))
        .route("/:entry_id/reject", post(reject_entry))
}

async fn lookup_entry(
    Query(query): Query<EntryKeyPayload>,
    CurrentActor(_actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<MarksEntryResponse>, ApiError> {
    query.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let key = EntryKey::from(query);
    let entry = marks_editor::lookup(state.store(), &key)
        .await?
        .ok_or_else(|| ApiError::NotFound("No marks have been entered for this selection".into()))?;
    Ok(Json(MarksEntryResponse::from(entry)))
}

async fn get_entry(
    Path(entry_id): Path<String>,
    CurrentActor(_actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<MarksEntryResponse>, ApiError> {
    let entry = state
        .store()
        .find_by_id(&entry_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load marks entry"))?
        .ok_or_else(|| ApiError::NotFound("Marks entry not found".to_string()))?;
    Ok(Json(MarksEntryResponse::from(entry)))
}

async fn list_for_review(
    Query(query): Query<ReviewQuery>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<Vec<MarksEntrySummary>>, ApiError> {
    if !actor.is_admin() {
        return Err(ApiError::Forbidden("Only administrators can review marks".to_string()));
    }
    if query.school_id.trim().is_empty() {
        return Err(ApiError::BadRequest("School is required".to_string()));
    }

    let entries =
        marks_editor::list_for_review(state.store(), query.school_id.trim(), query.status).await?;
    Ok(Json(entries.into_iter().map(MarksEntrySummary::from).collect()))
}

async fn approve_entry(
    Path(entry_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<MarksEntryResponse>, ApiError> {
    let entry =
        marks_editor::review(state.store(), &entry_id, &EntryAction::Approve, &actor).await?;
    Ok(Json(MarksEntryResponse::from(entry)))
}

async fn reject_entry(
    Path(entry_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<MarksEntryResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let action = EntryAction::Reject { reason: payload.reason };
    let entry = marks_editor::review(state.store(), &entry_id, &action, &actor).await?;
    Ok(Json(MarksEntryResponse::from(entry)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::db::types::EntryStatus;
    use crate::test_support::{self, mark_row, marks_entry};

    const ADMIN: Option<(&str, &str)> = Some(("admin-1", "MANAGER"));
    const TEACHER: Option<(&str, &str)> = Some(("teacher-1", "TEACHER"));

    fn submitted_entry() -> crate::db::models::MarksEntry {
        let mut entry = marks_entry("teacher-1", vec![mark_row("s1", "1", "Asha Rao", 100.0)]);
        entry.status = EntryStatus::Submitted;
        entry.is_locked = true;
        entry
    }

    #[tokio::test]
    async fn admin_approves_submitted_entry() {
        let ctx = test_support::setup_test_context().await;
        ctx.store.insert(submitted_entry());

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/v1/marks-entries/review?school_id=school-1",
                ADMIN,
                None,
            ))
            .await
            .expect("review list");
        assert_eq!(response.status(), StatusCode::OK);
        let list = test_support::read_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["students"], 1);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/marks-entries/entry-1/approve",
                ADMIN,
                None,
            ))
            .await
            .expect("approve");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {body}");
        assert_eq!(body["status"], "APPROVED");
        assert_eq!(body["approved_by"], "admin-1");
        assert_eq!(body["is_locked"], true);
        assert!(body["approval_date"].is_string());
    }

    #[tokio::test]
    async fn review_list_is_oldest_first() {
        let ctx = test_support::setup_test_context().await;
        let newer = submitted_entry();
        let mut older = submitted_entry();
        older.id = "entry-0".to_string();
        older.subject_id = "subject-2".to_string();
        older.entry_date = newer.entry_date - time::Duration::hours(2);
        ctx.store.insert(newer);
        ctx.store.insert(older);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/v1/marks-entries/review?school_id=school-1",
                ADMIN,
                None,
            ))
            .await
            .expect("review list");
        let list = test_support::read_json(response).await;
        let ids: Vec<&str> =
            list.as_array().unwrap().iter().filter_map(|entry| entry["id"].as_str()).collect();
        assert_eq!(ids, vec!["entry-0", "entry-1"]);
    }

    #[tokio::test]
    async fn teachers_cannot_review() {
        let ctx = test_support::setup_test_context().await;
        ctx.store.insert(submitted_entry());

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/marks-entries/entry-1/approve",
                TEACHER,
                None,
            ))
            .await
            .expect("approve");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::GET,
                "/api/v1/marks-entries/review?school_id=school-1",
                TEACHER,
                None,
            ))
            .await
            .expect("review list");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn reject_requires_a_reason() {
        let ctx = test_support::setup_test_context().await;
        ctx.store.insert(submitted_entry());

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/marks-entries/entry-1/reject",
                ADMIN,
                Some(json!({"reason": ""})),
            ))
            .await
            .expect("reject");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                "/api/v1/marks-entries/entry-1/reject",
                ADMIN,
                Some(json!({"reason": "   "})),
            ))
            .await
            .expect("reject");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ctx.store.entry("entry-1").unwrap().status, EntryStatus::Submitted);
    }

    #[tokio::test]
    async fn lookup_by_selection() {
        let ctx = test_support::setup_test_context().await;
        let uri = "/api/v1/marks-entries?school_id=school-1&exam_id=exam-1&class_id=class-1\
                   &section_id=section-a&subject_id=subject-1";

        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(Method::GET, uri, TEACHER, None))
            .await
            .expect("lookup");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        ctx.store.insert(submitted_entry());
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(Method::GET, uri, TEACHER, None))
            .await
            .expect("lookup");
        assert_eq!(response.status(), StatusCode::OK);
        let body = test_support::read_json(response).await;
        assert_eq!(body["id"], "entry-1");
        assert_eq!(body["rows"][0]["grade"], "F");
    }
}
