use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Basic, Authorization},
    TypedHeader,
};

use crate::error::AppError;
use crate::models::Session;
use crate::state::AppState;

const ERR_INVALID_CREDENTIALS: &str = "invalid session credentials";

/// Session extracted from HTTP Basic credentials where the user is the
/// session id and the password is the session key.
///
/// The only constructor is the `FromRequestParts` impl, so holding one
/// proves the caller presented the session's key.
pub struct AuthedSession(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for AuthedSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(basic)) = parts
            .extract::<TypedHeader<Authorization<Basic>>>()
            .await
            .map_err(|_| AppError::Auth(ERR_INVALID_CREDENTIALS.into()))?;

        let session = Session::load(state.store.as_ref(), basic.username()).await?;

        match session {
            Some(session) if session.key == basic.password() => Ok(AuthedSession(session)),
            _ => Err(AppError::Auth(ERR_INVALID_CREDENTIALS.into())),
        }
    }
}
