use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{chat_handler, generate_handler, health_handler, stats_handler, tags_handler};
use super::server::AppState;

#[derive(Clone)]
struct AuthConfig {
    token: Option<String>,
}

const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window request counter per client IP.
#[derive(Clone)]
struct RateLimiter {
    limit: u32,
    counters: Arc<Mutex<HashMap<IpAddr, (u32, Instant)>>>,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request from `ip` at `now`; false once the window's budget is spent.
    async fn allow(&self, ip: IpAddr, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut counters = self.counters.lock().await;
        if counters.len() >= MAX_RATE_LIMIT_ENTRIES && !counters.contains_key(&ip) {
            counters.retain(|_, (_, started)| now.duration_since(*started) < RATE_WINDOW);
        }
        let (count, started) = counters.entry(ip).or_insert((0, now));
        if now.duration_since(*started) >= RATE_WINDOW {
            *count = 0;
            *started = now;
        }
        *count += 1;
        *count <= self.limit
    }
}

/// Question-answering routes sit behind auth and rate limiting; status routes
/// stay open so load balancers and clients can probe them.
pub(crate) fn build_router(
    state: AppState,
    auth_token: Option<String>,
    rate_limit: u32,
    max_body_size: usize,
) -> Router {
    let auth_cfg = AuthConfig { token: auth_token };
    let limiter = RateLimiter::new(rate_limit);

    let protected = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/generate", post(generate_handler))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(middleware::from_fn_with_state(auth_cfg, auth_middleware))
        .layer(RequestBodyLimitLayer::new(max_body_size));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/tags", get(tags_handler))
        .route("/stats", get(stats_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(
    State(cfg): State<AuthConfig>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(ref expected) = cfg.token {
        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        // Fixed-length digests so the comparison does not leak token length.
        let token_hash = blake3::hash(token.as_bytes());
        let expected_hash = blake3::hash(expected.as_bytes());
        if !bool::from(token_hash.as_bytes().ct_eq(expected_hash.as_bytes())) {
            tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    next.run(req).await
}

async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), |ci| ci.0.ip());

    if !limiter.allow(ip, Instant::now()).await {
        tracing::warn!(%ip, limit = limiter.limit, "rate limit exceeded");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use http_body_util::BodyExt;
    use ragex_index::{IndexError, RagService, StoreStats};
    use ragex_store::VectorStoreError;
    use ragex_store::vector_store::BoxFuture;
    use tower::ServiceExt;

    use super::*;

    #[derive(Default)]
    struct FakeService {
        store_down: bool,
        queries: AtomicUsize,
        last_question: std::sync::Mutex<Option<String>>,
    }

    impl RagService for FakeService {
        fn query<'a>(
            &'a self,
            question: &'a str,
            _k: usize,
            _repo_filter: Option<&'a str>,
        ) -> BoxFuture<'a, ragex_index::Result<String>> {
            Box::pin(async move {
                self.queries.fetch_add(1, Ordering::SeqCst);
                *self.last_question.lock().unwrap() = Some(question.to_owned());
                if self.store_down {
                    return Err(IndexError::Store(VectorStoreError::Connection(
                        "connection refused".into(),
                    )));
                }
                if question.trim().is_empty() {
                    return Err(IndexError::EmptyQuery);
                }
                Ok(format!("answer to: {question}"))
            })
        }

        fn stats(&self) -> BoxFuture<'_, ragex_index::Result<StoreStats>> {
            Box::pin(async move {
                if self.store_down {
                    return Err(IndexError::Store(VectorStoreError::Connection(
                        "connection refused".into(),
                    )));
                }
                Ok(StoreStats {
                    total_points: 42,
                    vector_dim: 768,
                    distance: "Cosine".into(),
                })
            })
        }
    }

    fn test_state(service: Arc<FakeService>) -> AppState {
        AppState {
            service,
            model_name: Arc::from("codestral"),
            started_at: Instant::now(),
            started_rfc3339: Arc::from("2026-01-01T00:00:00+00:00"),
            default_k: 5,
        }
    }

    fn make_router(auth: Option<String>, rate_limit: u32) -> (Router, Arc<FakeService>) {
        let service = Arc::new(FakeService::default());
        let app = build_router(test_state(service.clone()), auth, rate_limit, 1_048_576);
        (app, service)
    }

    fn chat_request(question: &str) -> Request<Body> {
        let body = serde_json::json!({
            "model": "codestral",
            "messages": [{"role": "user", "content": question}],
        });
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ready() {
        let (app, _) = make_router(None, 0);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ready");
        assert_eq!(json["model"], "codestral");
        assert_eq!(json["database_stats"]["total_points"], 42);
    }

    #[tokio::test]
    async fn health_reports_store_failure() {
        let service = Arc::new(FakeService {
            store_down: true,
            ..FakeService::default()
        });
        let app = build_router(test_state(service), None, 0, 1_048_576);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 500);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "error");
        assert!(json["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn tags_lists_configured_model() {
        let (app, _) = make_router(None, 0);
        let req = Request::builder()
            .uri("/api/tags")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["models"][0]["name"], "codestral");
        assert_eq!(json["models"][0]["modified_at"], "2026-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn stats_returns_collection_info() {
        let (app, _) = make_router(None, 0);
        let req = Request::builder()
            .uri("/stats")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["total_points"], 42);
        assert_eq!(json["database_stats"]["vector_dim"], 768);
    }

    #[tokio::test]
    async fn chat_answers_last_user_message() {
        let (app, service) = make_router(None, 0);
        let body = serde_json::json!({
            "messages": [
                {"role": "user", "content": "old question"},
                {"role": "assistant", "content": "old answer"},
                {"role": "user", "content": "How does login work?"},
            ],
        });
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["model"], "codestral");
        assert_eq!(json["message"]["role"], "assistant");
        assert_eq!(json["message"]["content"], "answer to: How does login work?");
        assert_eq!(json["done"], true);
        assert_eq!(
            service.last_question.lock().unwrap().as_deref(),
            Some("How does login work?")
        );
    }

    #[tokio::test]
    async fn chat_rejects_empty_messages() {
        let (app, service) = make_router(None, 0);
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"messages":[]}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 400);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("messages"));
        assert_eq!(service.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chat_without_user_message_is_bad_request() {
        let (app, _) = make_router(None, 0);
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"messages":[{"role":"system","content":"be brief"}]}"#,
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn chat_with_blank_question_is_bad_request() {
        let (app, _) = make_router(None, 0);
        let resp = app.oneshot(chat_request("   ")).await.unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn chat_store_outage_is_service_unavailable() {
        let service = Arc::new(FakeService {
            store_down: true,
            ..FakeService::default()
        });
        let app = build_router(test_state(service), None, 0, 1_048_576);
        let resp = app.oneshot(chat_request("anything")).await.unwrap();
        assert_eq!(resp.status(), 503);
        let json = body_json(resp).await;
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn generate_answers_prompt() {
        let (app, _) = make_router(None, 0);
        let req = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model":"x","prompt":"Where is billing?"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = body_json(resp).await;
        assert_eq!(json["response"], "answer to: Where is billing?");
        assert_eq!(json["done"], true);
    }

    #[tokio::test]
    async fn generate_requires_prompt() {
        let (app, _) = make_router(None, 0);
        let req = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 400);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "prompt is required");
    }

    #[tokio::test]
    async fn auth_rejects_missing_token() {
        let (app, service) = make_router(Some("secret".into()), 0);
        let resp = app.oneshot(chat_request("hi")).await.unwrap();
        assert_eq!(resp.status(), 401);
        assert_eq!(service.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auth_rejects_wrong_token() {
        let (app, _) = make_router(Some("secret".into()), 0);
        let mut req = chat_request("hi");
        req.headers_mut()
            .insert("authorization", "Bearer wrong".parse().unwrap());
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn auth_accepts_valid_token() {
        let (app, _) = make_router(Some("secret".into()), 0);
        let mut req = chat_request("hi");
        req.headers_mut()
            .insert("authorization", "Bearer secret".parse().unwrap());
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn status_routes_skip_auth() {
        let (app, _) = make_router(Some("secret".into()), 0);
        for uri in ["/health", "/api/tags", "/stats"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), 200, "{uri}");
        }
    }

    #[tokio::test]
    async fn rate_limit_enforced() {
        use tower::Service;

        let (mut app, _) = make_router(None, 2);
        let resp = app.call(chat_request("a")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let resp = app.call(chat_request("b")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let resp = app.call(chat_request("c")).await.unwrap();
        assert_eq!(resp.status(), 429);
    }

    #[tokio::test]
    async fn rate_limiter_window_resets() {
        let limiter = RateLimiter::new(2);
        let ip = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
        let other = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 7));
        let start = Instant::now();

        assert!(limiter.allow(ip, start).await);
        assert!(limiter.allow(ip, start).await);
        assert!(!limiter.allow(ip, start + Duration::from_secs(1)).await);
        assert!(limiter.allow(other, start).await);
        assert!(limiter.allow(ip, start + RATE_WINDOW).await);
    }

    #[tokio::test]
    async fn zero_limit_disables_limiting() {
        let limiter = RateLimiter::new(0);
        let ip = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
        for _ in 0..100 {
            assert!(limiter.allow(ip, Instant::now()).await);
        }
        assert!(limiter.counters.lock().await.is_empty());
    }

    #[tokio::test]
    async fn body_size_limit() {
        let service = Arc::new(FakeService::default());
        let app = build_router(test_state(service), None, 0, 64);
        let oversized = vec![b'a'; 128];
        let req = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(oversized))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 413);
    }
}
