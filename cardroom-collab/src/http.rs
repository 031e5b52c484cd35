//! HTTP profile query.
//!
//! `GET /api/users/:id` returns a user's public profile for rendering
//! names next to cards and votes. Callers authenticate with the same bearer
//! credential the WebSocket handshake accepts.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::auth::{bearer_token, Authenticator};
use crate::directory::{UserDirectory, UserProfile};

#[derive(Clone)]
pub struct ApiState {
    pub authenticator: Arc<dyn Authenticator>,
    pub directory: Arc<dyn UserDirectory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("User not found")]
    NotFound,
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/users/:id", get(get_user))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Profile API listening on {addr}");
    }
    axum::serve(listener, router(state)).await
}

async fn health() -> &'static str {
    "ok"
}

async fn get_user(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ApiError::Unauthorized)?;
    let caller = state
        .authenticator
        .verify(token)
        .map_err(|_| ApiError::Unauthorized)?;

    match state.directory.get_user(&id) {
        Ok(Some(profile)) => Ok(Json(profile)),
        Ok(None) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("Profile lookup of {id} for {caller} failed: {e}");
            Err(ApiError::Internal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuthenticator;
    use crate::directory::{DirectoryError, InMemoryUserDirectory};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct BrokenDirectory;

    impl UserDirectory for BrokenDirectory {
        fn get_user(&self, _id: &str) -> Result<Option<UserProfile>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection refused".into()))
        }
    }

    fn state(directory: Arc<dyn UserDirectory>) -> ApiState {
        ApiState {
            authenticator: Arc::new(StaticTokenAuthenticator::new().with_token("secret", "1")),
            directory,
        }
    }

    fn directory() -> Arc<dyn UserDirectory> {
        Arc::new(InMemoryUserDirectory::new().with_user(UserProfile {
            id: "1".into(),
            name: "Alice".into(),
            profile_image: None,
        }))
    }

    async fn call(state: ApiState, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let response = router(state)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_profile_found() {
        let (status, body) = call(state(directory()), "/api/users/1", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "id": "1", "name": "Alice", "profileImage": null }));
    }

    #[tokio::test]
    async fn test_profile_not_found() {
        let (status, body) = call(state(directory()), "/api/users/9", Some("secret")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "User not found" }));
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let (status, body) = call(state(directory()), "/api/users/1", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Unauthorized" }));

        let (status, _) = call(state(directory()), "/api/users/1", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_directory_failure_hides_detail() {
        let (status, body) =
            call(state(Arc::new(BrokenDirectory)), "/api/users/1", Some("secret")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Internal server error" }));
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(state(directory()))
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }
}
