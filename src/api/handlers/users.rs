use super::{Envelope, ErrorBody, PrincipalView, ok, path_id};
use crate::auth::{AuthError, AuthState, PrincipalKind};
use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
};
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User profile", body = Envelope<PrincipalView>),
        (status = 403, description = "Neither the user nor an admin", body = ErrorBody),
        (status = 404, description = "No such user", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn get_user(
    state: Extension<Arc<AuthState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AuthError> {
    let user = state
        .authenticator()
        .profile(PrincipalKind::User, path_id(&id)?)
        .await?;
    Ok(ok(PrincipalView::from(user)))
}
