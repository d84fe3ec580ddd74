use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::db::types::UserRole;
use crate::services::entry_workflow::Actor;

pub(crate) const USER_ID_HEADER: &str = "x-user-id";
pub(crate) const USER_ROLE_HEADER: &str = "x-user-role";

/// Caller identity forwarded by the gateway in `x-user-id` / `x-user-role`.
pub(crate) struct CurrentActor(pub(crate) Actor);

#[async_trait]
impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let role = header_value(parts, USER_ROLE_HEADER)
            .ok_or(ApiError::Unauthorized("User role is required"))?;
        let role = UserRole::parse(role)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown user role: {role}")))?;
        let actor = match header_value(parts, USER_ID_HEADER) {
            Some(user_id) => Actor::new(user_id, role),
            None => Actor { user_id: None, role },
        };

        Ok(CurrentActor(actor))
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    use crate::test_support;

    async fn extract(request: Request<()>) -> Result<Actor, ApiError> {
        let ctx = test_support::setup_test_context().await;
        let (mut parts, _) = request.into_parts();
        CurrentActor::from_request_parts(&mut parts, &ctx.state).await.map(|actor| actor.0)
    }

    #[tokio::test]
    async fn headers_become_an_actor() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "teacher-1")
            .header(USER_ROLE_HEADER, "teacher")
            .body(())
            .unwrap();
        let actor = extract(request).await.unwrap();
        assert_eq!(actor, Actor::new("teacher-1", UserRole::Teacher));
    }

    #[tokio::test]
    async fn missing_user_id_is_kept_for_the_workflow_to_reject() {
        let request = Request::builder().header(USER_ROLE_HEADER, "ADMIN").body(()).unwrap();
        let actor = extract(request).await.unwrap();
        assert_eq!(actor.user_id, None);
        assert!(actor.is_admin());
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "u1")
            .header(USER_ROLE_HEADER, "principal")
            .body(())
            .unwrap();
        assert!(matches!(extract(request).await, Err(ApiError::BadRequest(_))));

        let request = Request::builder().header(USER_ID_HEADER, "u1").body(()).unwrap();
        assert!(matches!(extract(request).await, Err(ApiError::Unauthorized(_))));
    }
}
