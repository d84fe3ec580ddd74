use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentActor;
use crate::core::metrics::IMPORT_ROWS;
use crate::core::state::AppState;
use crate::db::models::{EntryKey, MarkRow};
use crate::schemas::marks::{
    EntryKeyPayload, GradeRequest, ImportConfirmed, ImportRequest, MarkEditRequest,
    MarksEntryResponse, RemarksRequest, RowFilterQuery, SaveMode, SaveRequest, SessionOpened,
    SessionView,
};
use crate::services::edit_session::EditSession;
use crate::services::entry_workflow::{can_edit, Actor, EntryAction};
use crate::services::errors::MarksError;
use crate::services::import_reconcile::{self, ImportPreview};
use crate::services::mark_rows;
use crate::services::marks_editor;
use crate::services::template_export::{self, TemplateRow};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(open_session))
        .route("/:session_id", get(view_session).delete(close_session))
        .route("/:session_id/selection", put(select_entry))
        .route("/:session_id/rows/:student_id", patch(edit_mark))
        .route("/:session_id/rows/:student_id/absent", post(toggle_absent))
        .route("/:session_id/rows/:student_id/na", post(toggle_na))
        .route("/:session_id/rows/:student_id/grade", put(set_grade))
        .route("/:session_id/rows/:student_id/remarks", put(set_remarks))
        .route("/:session_id/import", post(preview_import).delete(discard_import))
        .route("/:session_id/import/confirm", post(confirm_import))
        .route("/:session_id/template", get(export_template))
        .route("/:session_id/save", post(save_entry))
}

fn session_view(
    session_id: &str,
    session: &mut EditSession,
    actor: &Actor,
    search: Option<&str>,
) -> SessionView {
    let state = session.state(Instant::now());
    let rows = match search {
        Some(query) => mark_rows::filter_rows(session.rows(), query).into_iter().cloned().collect(),
        None => session.rows().to_vec(),
    };

    SessionView {
        session_id: session_id.to_string(),
        key: session.key().cloned(),
        generation: session.generation(),
        loaded: session.is_loaded(),
        state: state.as_str(),
        editable: session.is_loaded() && can_edit(session.reference(), actor),
        subject_name: session.subject().map(|subject| subject.subject_name.clone()),
        max_marks: session.subject().map(|subject| subject.max_marks),
        uses_components: session.subject().is_some_and(|subject| subject.uses_components),
        assessment_type: session.assessment(),
        grade_table: session.table().source().as_str(),
        rows,
        reference: session.reference().cloned().map(MarksEntryResponse::from),
        pending_import: session.pending_import().cloned(),
    }
}

fn not_selected() -> ApiError {
    MarksError::Validation("Select exam, class and subject first".to_string()).into()
}

async fn open_session(
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionOpened>), ApiError> {
    let (session_id, _) = state.sessions().open(&actor).await?;
    Ok((StatusCode::CREATED, Json(SessionOpened { session_id })))
}

async fn view_session(
    Path(session_id): Path<String>,
    Query(query): Query<RowFilterQuery>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<SessionView>, ApiError> {
    let shared = state.sessions().get(&session_id, &actor).await?;
    let mut session = shared.lock().await;
    Ok(Json(session_view(&session_id, &mut session, &actor, query.search.as_deref())))
}

async fn close_session(
    Path(session_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.sessions().close(&session_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn select_entry(
    Path(session_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
    Json(payload): Json<EntryKeyPayload>,
) -> Result<Json<SessionView>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let key = EntryKey::from(payload);
    marks_editor::validate_key(&key)?;

    let shared = state.sessions().get(&session_id, &actor).await?;
    let generation = shared.lock().await.select(key.clone());
    let loaded = marks_editor::load_entry(state.store(), &key, generation).await?;

    let mut session = shared.lock().await;
    session.finish_load(loaded)?;
    Ok(Json(session_view(&session_id, &mut session, &actor, None)))
}

async fn edit_mark(
    Path((session_id, student_id)): Path<(String, String)>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
    Json(payload): Json<MarkEditRequest>,
) -> Result<Json<MarkRow>, ApiError> {
    let shared = state.sessions().get(&session_id, &actor).await?;
    let mut session = shared.lock().await;
    let row = session.edit_mark(&actor, &student_id, payload.field, payload.value)?;
    Ok(Json(row.clone()))
}

async fn toggle_absent(
    Path((session_id, student_id)): Path<(String, String)>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<MarkRow>, ApiError> {
    let shared = state.sessions().get(&session_id, &actor).await?;
    let mut session = shared.lock().await;
    let row = session.toggle_absent(&actor, &student_id)?;
    Ok(Json(row.clone()))
}

async fn toggle_na(
    Path((session_id, student_id)): Path<(String, String)>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<MarkRow>, ApiError> {
    let shared = state.sessions().get(&session_id, &actor).await?;
    let mut session = shared.lock().await;
    let row = session.toggle_na(&actor, &student_id)?;
    Ok(Json(row.clone()))
}

async fn set_grade(
    Path((session_id, student_id)): Path<(String, String)>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
    Json(payload): Json<GradeRequest>,
) -> Result<Json<MarkRow>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let shared = state.sessions().get(&session_id, &actor).await?;
    let mut session = shared.lock().await;
    let row = session.set_grade(&actor, &student_id, payload.grade.as_deref())?;
    Ok(Json(row.clone()))
}

async fn set_remarks(
    Path((session_id, student_id)): Path<(String, String)>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
    Json(payload): Json<RemarksRequest>,
) -> Result<Json<MarkRow>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let shared = state.sessions().get(&session_id, &actor).await?;
    let mut session = shared.lock().await;
    let row = session.set_remarks(&actor, &student_id, payload.remarks)?;
    Ok(Json(row.clone()))
}

async fn preview_import(
    Path(session_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
    Json(payload): Json<ImportRequest>,
) -> Result<Json<ImportPreview>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let shared = state.sessions().get(&session_id, &actor).await?;

    let (generation, rows, subject_name) = {
        let session = shared.lock().await;
        if !session.is_loaded() {
            return Err(not_selected());
        }
        (session.generation(), session.rows().to_vec(), session.subject_name().to_string())
    };

    let preview = import_reconcile::preview(
        &rows,
        &payload.rows,
        state.import_columns(),
        &subject_name,
        payload.section_label.as_deref(),
    );
    let matched = preview.matches.len() as u64;
    let unmatched = preview.errors.len() as u64;
    metrics::counter!(IMPORT_ROWS, "outcome" => "matched").increment(matched);
    metrics::counter!(IMPORT_ROWS, "outcome" => "unmatched").increment(unmatched);
    tracing::info!(
        session_id = %session_id,
        matched,
        unmatched,
        "Marks import previewed"
    );

    let mut session = shared.lock().await;
    let staged = session.stage_import(generation, preview)?;
    Ok(Json(staged.clone()))
}

async fn confirm_import(
    Path(session_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<ImportConfirmed>, ApiError> {
    let shared = state.sessions().get(&session_id, &actor).await?;
    let applied = shared.lock().await.confirm_import(&actor)?;
    tracing::info!(session_id = %session_id, applied, "Marks import applied");
    Ok(Json(ImportConfirmed { applied }))
}

async fn discard_import(
    Path(session_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let shared = state.sessions().get(&session_id, &actor).await?;
    if shared.lock().await.discard_import() {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("No import is waiting for confirmation".to_string()))
    }
}

async fn export_template(
    Path(session_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
) -> Result<Json<Vec<TemplateRow>>, ApiError> {
    let shared = state.sessions().get(&session_id, &actor).await?;
    let session = shared.lock().await;
    if !session.is_loaded() {
        return Err(not_selected());
    }
    Ok(Json(template_export::template_rows(session.rows())))
}

async fn save_entry(
    Path(session_id): Path<String>,
    CurrentActor(actor): CurrentActor,
    State(state): State<AppState>,
    Json(payload): Json<SaveRequest>,
) -> Result<Json<MarksEntryResponse>, ApiError> {
    let action = match payload.mode {
        SaveMode::Draft => EntryAction::SaveDraft,
        SaveMode::Submit => EntryAction::Submit,
    };
    let shared = state.sessions().get(&session_id, &actor).await?;
    let ticket = shared.lock().await.begin_save(Instant::now())?;
    let generation = ticket.generation;

    let result = marks_editor::persist(
        state.store(),
        ticket,
        &action,
        &actor,
        state.settings().marks().optimistic_locking,
    )
    .await;

    let outcome = result.as_ref().map(Clone::clone).map_err(|_| ());
    shared.lock().await.finish_save(generation, outcome, Instant::now());

    match result {
        Ok(saved) => Ok(Json(MarksEntryResponse::from(saved))),
        Err(err) => {
            tracing::warn!(session_id = %session_id, error = %err, "Marks save failed");
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::db::types::AssessmentType;
    use crate::test_support;

    const TEACHER: Option<(&str, &str)> = Some(("teacher-1", "TEACHER"));
    const OTHER_TEACHER: Option<(&str, &str)> = Some(("teacher-2", "TEACHER"));
    const ADMIN: Option<(&str, &str)> = Some(("admin-1", "ADMIN"));

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        actor: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(test_support::json_request(method, uri, actor, body))
            .await
            .expect("response");
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return (status, Value::Null);
        }
        (status, test_support::read_json(response).await)
    }

    fn selection() -> Value {
        json!({
            "school_id": "school-1",
            "exam_id": "exam-1",
            "class_id": "class-1",
            "section_id": "section-a",
            "subject_id": "subject-1"
        })
    }

    async fn open_selected(app: &Router, actor: Option<(&str, &str)>) -> String {
        let (status, opened) = call(app, Method::POST, "/api/v1/marks-sessions", actor, None).await;
        assert_eq!(status, StatusCode::CREATED, "response: {opened}");
        let session_id = opened["session_id"].as_str().expect("session id").to_string();

        let (status, view) = call(
            app,
            Method::PUT,
            &format!("/api/v1/marks-sessions/{session_id}/selection"),
            actor,
            Some(selection()),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "response: {view}");
        session_id
    }

    #[tokio::test]
    async fn teacher_enters_submits_and_admin_rejects() {
        let ctx = test_support::setup_test_context().await;
        let session_id = open_selected(&ctx.app, TEACHER).await;
        let base = format!("/api/v1/marks-sessions/{session_id}");

        for (student_id, marks) in [("s1", 80), ("s2", 45), ("s3", 95)] {
            let (status, row) = call(
                &ctx.app,
                Method::PATCH,
                &format!("{base}/rows/{student_id}"),
                TEACHER,
                Some(json!({"field": "obtained", "value": marks})),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "response: {row}");
        }

        let (_, view) = call(&ctx.app, Method::GET, &base, TEACHER, None).await;
        let grades: Vec<&str> = view["rows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["grade"].as_str().unwrap())
            .collect();
        assert_eq!(grades, vec!["B+", "D", "A+"]);
        assert_eq!(view["state"], "editing");
        assert_eq!(view["grade_table"], "fallback");

        let (status, saved) = call(
            &ctx.app,
            Method::POST,
            &format!("{base}/save"),
            TEACHER,
            Some(json!({"mode": "submit"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "response: {saved}");
        assert_eq!(saved["status"], "SUBMITTED");
        assert_eq!(saved["is_locked"], true);
        let entry_id = saved["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &ctx.app,
            Method::PATCH,
            &format!("{base}/rows/s1"),
            TEACHER,
            Some(json!({"field": "obtained", "value": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, rejected) = call(
            &ctx.app,
            Method::POST,
            &format!("/api/v1/marks-entries/{entry_id}/reject"),
            ADMIN,
            Some(json!({"reason": "wrong subject"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "response: {rejected}");
        assert_eq!(rejected["status"], "REJECTED");
        assert_eq!(rejected["is_locked"], false);
        let stored = ctx.store.entry(&entry_id).unwrap();
        assert_eq!(stored.rejection_reason.as_deref(), Some("wrong subject"));
    }

    #[tokio::test]
    async fn graded_subject_rows_take_letters() {
        let ctx = test_support::setup_test_context_with(|store| {
            let mut subject = test_support::exam_subject(100.0, false);
            subject.assessment_type = AssessmentType::Grade;
            store.with_subject(subject)
        })
        .await;
        let session_id = open_selected(&ctx.app, TEACHER).await;
        let base = format!("/api/v1/marks-sessions/{session_id}");

        let (_, view) = call(&ctx.app, Method::GET, &base, TEACHER, None).await;
        assert_eq!(view["assessment_type"], "GRADE");
        assert_eq!(view["rows"][0]["grade"], "");

        let (status, row) = call(
            &ctx.app,
            Method::PUT,
            &format!("{base}/rows/s1/grade"),
            TEACHER,
            Some(json!({"grade": "a+"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "response: {row}");
        assert_eq!(row["grade"], "A+");
        assert_eq!(row["obtained_marks"], 0.0);

        let (status, body) = call(
            &ctx.app,
            Method::PUT,
            &format!("{base}/rows/s2/grade"),
            TEACHER,
            Some(json!({"grade": "Z"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "unknown grade Z");

        let (status, _) = call(
            &ctx.app,
            Method::PATCH,
            &format!("{base}/rows/s2"),
            TEACHER,
            Some(json!({"field": "obtained", "value": 40})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, saved) = call(
            &ctx.app,
            Method::POST,
            &format!("{base}/save"),
            TEACHER,
            Some(json!({"mode": "draft"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "response: {saved}");
        let stored = ctx.store.entry(saved["id"].as_str().unwrap()).unwrap();
        assert_eq!(stored.rows.0[0].grade.label(), "A+");
    }

    #[tokio::test]
    async fn absent_toggle_and_search_filter() {
        let ctx = test_support::setup_test_context().await;
        let session_id = open_selected(&ctx.app, TEACHER).await;
        let base = format!("/api/v1/marks-sessions/{session_id}");

        let (status, row) =
            call(&ctx.app, Method::POST, &format!("{base}/rows/s2/absent"), TEACHER, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(row["grade"], "AB");
        assert_eq!(row["is_absent"], true);

        let (status, body) =
            call(&ctx.app, Method::POST, &format!("{base}/rows/s2/na"), TEACHER, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "student is marked absent; clear that flag first");

        let (_, view) =
            call(&ctx.app, Method::GET, &format!("{base}?search=bilal"), TEACHER, None).await;
        assert_eq!(view["rows"].as_array().unwrap().len(), 1);
        assert_eq!(view["rows"][0]["student_id"], "s2");
    }

    #[tokio::test]
    async fn import_preview_confirm_and_template() {
        let ctx = test_support::setup_test_context().await;
        let session_id = open_selected(&ctx.app, TEACHER).await;
        let base = format!("/api/v1/marks-sessions/{session_id}");

        let (status, template) =
            call(&ctx.app, Method::GET, &format!("{base}/template"), TEACHER, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(template.as_array().unwrap().len(), 3);
        assert_eq!(template[0]["Admission No"], "ADM-s1");

        let sheet = json!({
            "rows": [
                {"Admission No": "ADM-s1", "Obtained Marks": 70},
                {"Student Name": "chen  li", "Marks": "AB"},
                {"Student Name": "Nobody"}
            ],
            "section_label": "A"
        });
        let (status, preview) =
            call(&ctx.app, Method::POST, &format!("{base}/import"), TEACHER, Some(sheet)).await;
        assert_eq!(status, StatusCode::OK, "response: {preview}");
        assert_eq!(preview["matches"].as_array().unwrap().len(), 2);
        assert_eq!(preview["errors"][0]["line"], 4);
        assert_eq!(
            preview["errors"][0]["message"],
            "Row 4: Student \"Nobody\" not found in current Section A."
        );

        let (_, view) = call(&ctx.app, Method::GET, &base, TEACHER, None).await;
        assert_eq!(view["rows"][0]["obtained_marks"], 0.0);
        assert!(view["pending_import"].is_object());

        let (status, confirmed) =
            call(&ctx.app, Method::POST, &format!("{base}/import/confirm"), TEACHER, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(confirmed["applied"], 2);

        let (_, view) = call(&ctx.app, Method::GET, &base, TEACHER, None).await;
        assert_eq!(view["rows"][0]["obtained_marks"], 70.0);
        assert_eq!(view["rows"][2]["grade"], "AB");

        let (status, _) =
            call(&ctx.app, Method::DELETE, &format!("{base}/import"), TEACHER, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sessions_are_private_and_incomplete_selection_is_rejected() {
        let ctx = test_support::setup_test_context().await;
        let (_, opened) =
            call(&ctx.app, Method::POST, "/api/v1/marks-sessions", TEACHER, None).await;
        let session_id = opened["session_id"].as_str().unwrap();
        let base = format!("/api/v1/marks-sessions/{session_id}");

        let (status, _) = call(&ctx.app, Method::GET, &base, OTHER_TEACHER, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut incomplete = selection();
        incomplete["class_id"] = json!("");
        let selection_uri = format!("{base}/selection");
        let (status, body) =
            call(&ctx.app, Method::PUT, &selection_uri, TEACHER, Some(incomplete)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Please select a class");

        let (status, _) = call(
            &ctx.app,
            Method::POST,
            &format!("{base}/save"),
            TEACHER,
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&ctx.app, Method::DELETE, &base, TEACHER, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(ctx.state.sessions().len().await, 0);
    }

    #[tokio::test]
    async fn other_teacher_cannot_edit_a_draft() {
        let ctx = test_support::setup_test_context().await;
        let session_id = open_selected(&ctx.app, TEACHER).await;
        let (status, _) = call(
            &ctx.app,
            Method::POST,
            &format!("/api/v1/marks-sessions/{session_id}/save"),
            TEACHER,
            Some(json!({"mode": "draft"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let other_session = open_selected(&ctx.app, OTHER_TEACHER).await;
        let (status, body) = call(
            &ctx.app,
            Method::PATCH,
            &format!("/api/v1/marks-sessions/{other_session}/rows/s1"),
            OTHER_TEACHER,
            Some(json!({"field": "obtained", "value": 12})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "response: {body}");

        let admin_session = open_selected(&ctx.app, ADMIN).await;
        let (status, _) = call(
            &ctx.app,
            Method::PATCH,
            &format!("/api/v1/marks-sessions/{admin_session}/rows/s1"),
            ADMIN,
            Some(json!({"field": "obtained", "value": 12})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
