use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::utils::jwt::decode_jwt;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Authenticated caller, extracted from the `Authorization: Bearer` header.
///
/// Handlers that take an `AuthUser` reject unauthenticated requests with 401
/// before the handler body runs.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let data = decode_jwt(
            token,
            &state.jwt_keys,
            &state.config.jwt_issuer,
            &state.config.jwt_audience,
        )
        .map_err(|err| {
            debug!(error = %err, "rejected bearer token");
            StatusCode::UNAUTHORIZED
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser {
            user_id,
            email: data.claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::utils::jwt::create_jwt;

    fn claims_for(user_id: Uuid) -> Claims {
        Claims {
            sub: user_id.to_string(),
            email: "user@example.com".into(),
            exp: (SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + 300) as usize,
            iss: String::new(),
            aud: String::new(),
        }
    }

    #[tokio::test]
    async fn extracts_user_from_valid_bearer_token() {
        let state = crate::test_support::test_state();
        let user_id = Uuid::new_v4();
        let token = create_jwt(
            claims_for(user_id),
            &state.jwt_keys,
            &state.config.jwt_issuer,
            &state.config.jwt_audience,
        )
        .unwrap();

        let request = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let user = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("token should authenticate");
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email, "user@example.com");
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let state = crate::test_support::test_state();
        let request = Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_garbage_token() {
        let state = crate::test_support::test_state();
        let request = Request::builder()
            .header(AUTHORIZATION, "Bearer not-a-jwt")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::UNAUTHORIZED);
    }
}
