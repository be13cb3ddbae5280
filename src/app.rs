use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, meals};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(auth::router())
                .merge(meals::router(&state.config.images))
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtKeys;
    use axum::{
        body::Body,
        extract::FromRef,
        http::{header, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::images::services::fixtures::JPEG;
    use crate::storage::MemoryStorage;

    fn bearer(state: &AppState) -> String {
        let token = JwtKeys::from_ref(state).sign_access(Uuid::new_v4()).unwrap();
        format!("Bearer {}", token)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn json_post(uri: &str, auth: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut b = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(a) = auth {
            b = b.header(header::AUTHORIZATION, a);
        }
        b.body(Body::from(body.to_string())).unwrap()
    }

    fn with_image_limit(max_bytes: usize) -> (AppState, Arc<MemoryStorage>) {
        let (mut state, memory) = AppState::fake_with_storage();
        let mut config = (*state.config).clone();
        config.images.max_bytes = max_bytes;
        state.config = Arc::new(config);
        (state, memory)
    }

    fn image_put(auth: &str, photo: &[u8]) -> Request<Body> {
        let boundary = "nomly-test-boundary";
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"meal.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n",
            b = boundary
        )
        .into_bytes();
        body.extend_from_slice(photo);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        Request::builder()
            .method(Method::PUT)
            .uri(format!("/api/v1/meals/{}/image", Uuid::new_v4()))
            .header(header::AUTHORIZATION, auth)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn meal_routes_require_a_token() {
        let state = AppState::fake();
        for (method, uri) in [
            (Method::GET, "/api/v1/meals"),
            (Method::GET, "/api/v1/meals/stream"),
            (Method::GET, "/api/v1/me"),
            (Method::DELETE, "/api/v1/meals/00000000-0000-0000-0000-000000000001"),
            (Method::GET, "/api/v1/meals/00000000-0000-0000-0000-000000000001/share"),
        ] {
            let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
            let (status, body) = send(build_app(state.clone()), req).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(body["error"], "Missing Authorization header");
        }
    }

    #[tokio::test]
    async fn refresh_token_cannot_call_meal_routes() {
        let state = AppState::fake();
        let refresh = JwtKeys::from_ref(&state).sign_refresh(Uuid::new_v4()).unwrap();
        let req = Request::get("/api/v1/meals")
            .header(header::AUTHORIZATION, format!("Bearer {}", refresh))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Access token required");
    }

    #[tokio::test]
    async fn create_meal_validation_runs_before_the_database() {
        let state = AppState::fake();
        let auth = bearer(&state);
        let req = json_post(
            "/api/v1/meals",
            Some(&auth),
            serde_json::json!({
                "title": "Toast",
                "description": "",
                "portion_size": "2 slices",
                "time_eaten": "08:00 AM"
            }),
        );
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Description is required");
    }

    #[tokio::test]
    async fn oversized_inline_image_is_rejected() {
        use base64::Engine;
        let state = AppState::fake();
        let auth = bearer(&state);
        let mut photo = crate::images::services::fixtures::JPEG.to_vec();
        photo.resize(1_200_000, 0);
        let req = json_post(
            "/api/v1/meals",
            Some(&auth),
            serde_json::json!({
                "title": "Toast",
                "description": "Buttered",
                "portion_size": "2 slices",
                "time_eaten": "08:00 AM",
                "image_base64": base64::engine::general_purpose::STANDARD.encode(&photo),
            }),
        );
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Image is too large. Max 1MB allowed.");
    }

    #[tokio::test]
    async fn oversized_meal_body_gets_json_error() {
        let state = AppState::fake();
        let auth = bearer(&state);
        let req = json_post(
            "/api/v1/meals",
            Some(&auth),
            serde_json::json!({
                "title": "Toast",
                "description": "x".repeat(1_500_000),
                "portion_size": "2 slices",
                "time_eaten": "08:00 AM",
            }),
        );
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Image is too large. Max 1MB allowed.");
    }

    #[tokio::test]
    async fn image_upload_limit_follows_config() {
        let mut photo = JPEG.to_vec();
        photo.resize(1_200_000, 0);
        let state = AppState::fake();
        let auth = bearer(&state);
        let (status, body) = send(build_app(state), image_put(&auth, &photo)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "Image is too large. Max 1MB allowed.");

        // Past the size checks the upload reaches storage and then the database,
        // which the fake state lacks; the stored photo is cleaned up again.
        photo.resize(3_500_000, 0);
        let (state, memory) = with_image_limit(5_000_000);
        let auth = bearer(&state);
        let (status, body) = send(build_app(state), image_put(&auth, &photo)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(memory.len(), 0);
    }

    #[tokio::test]
    async fn meal_stream_reports_load_failure() {
        let state = AppState::fake();
        let req = Request::get("/api/v1/meals/stream")
            .header(header::AUTHORIZATION, bearer(&state))
            .body(Body::empty())
            .unwrap();
        let res = build_app(state).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let content_type = res.headers()[header::CONTENT_TYPE].to_str().unwrap().to_owned();
        assert!(content_type.starts_with("text/event-stream"), "{}", content_type);

        // The producer gives up after the failed query, which ends the body.
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: error\ndata: Failed to load meals\n"), "{}", text);
        assert!(!text.contains("event: meals"));
    }

    #[tokio::test]
    async fn list_rejects_unknown_meal_type_filter() {
        let state = AppState::fake();
        let auth = bearer(&state);
        let req = Request::get("/api/v1/meals?meal_type=snack")
            .header(header::AUTHORIZATION, auth)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown meal type");
    }

    #[tokio::test]
    async fn register_validation_messages() {
        let state = AppState::fake();
        let cases = [
            (serde_json::json!({"email": "nope", "password": "secret1", "confirm_password": "secret1"}),
             "Please enter a valid email address"),
            (serde_json::json!({"email": "a@b.co", "password": "secret1", "confirm_password": "secret2"}),
             "Passwords do not match."),
            (serde_json::json!({"email": "a@b.co", "password": "abc", "confirm_password": "abc"}),
             "Password must be at least 6 characters."),
        ];
        for (body, msg) in cases {
            let req = json_post("/api/v1/auth/register", None, body);
            let (status, res) = send(build_app(state.clone()), req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(res["error"], msg);
        }
    }

    #[tokio::test]
    async fn missing_auth_fields_fail_validation() {
        let state = AppState::fake();
        for uri in ["/api/v1/auth/register", "/api/v1/auth/login", "/api/v1/auth/password-reset"] {
            let req = json_post(uri, None, serde_json::json!({}));
            let (status, body) = send(build_app(state.clone()), req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["error"], "Please enter a valid email address", "{}", uri);
        }

        let req = json_post(
            "/api/v1/auth/register",
            None,
            serde_json::json!({"password": "secret1", "confirm_password": "secret1"}),
        );
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Please enter a valid email address");
    }

    #[tokio::test]
    async fn login_and_reset_validate_email() {
        let state = AppState::fake();
        let req = json_post(
            "/api/v1/auth/login",
            None,
            serde_json::json!({"email": "bad", "password": "whatever"}),
        );
        let (status, _) = send(build_app(state.clone()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = json_post(
            "/api/v1/auth/password-reset",
            None,
            serde_json::json!({"email": "still bad"}),
        );
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Please enter a valid email address");
    }

    #[tokio::test]
    async fn reset_confirm_requires_reset_token() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let access = keys.sign_access(Uuid::new_v4()).unwrap();
        let req = json_post(
            "/api/v1/auth/password-reset/confirm",
            None,
            serde_json::json!({"token": access, "new_password": "newpass1"}),
        );
        let (status, _) = send(build_app(state.clone()), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let reset = keys.sign_reset(Uuid::new_v4()).unwrap();
        let req = json_post(
            "/api/v1/auth/password-reset/confirm",
            None,
            serde_json::json!({"token": reset, "new_password": "123"}),
        );
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Password must be at least 6 characters.");
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() {
        let state = AppState::fake();
        let access = JwtKeys::from_ref(&state).sign_access(Uuid::new_v4()).unwrap();
        let req = json_post(
            "/api/v1/auth/refresh",
            None,
            serde_json::json!({"refresh_token": access}),
        );
        let (status, body) = send(build_app(state), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "not a refresh token");
    }
}
