use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use health::HealthRegistry;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;
use uuid::Uuid;

use service_core::auth::user::MemoryUserStore;
use service_core::auth::{SharedSecretVerifier, TokenIssuer};
use service_core::router::{app, AppState};

const PROVIDER_SECRET: &str = "provider-secret";

struct TestApp {
    router: Router,
    tokens: Arc<TokenIssuer>,
}

impl TestApp {
    fn new() -> Self {
        let tokens = Arc::new(TokenIssuer::new("service-secret", "bazaar", 30));
        let state = AppState {
            tokens: tokens.clone(),
            identity: Arc::new(SharedSecretVerifier::new(PROVIDER_SECRET)),
            users: Arc::new(MemoryUserStore::new()),
            liveness: HealthRegistry::new("liveness"),
        };
        Self {
            router: app(state),
            tokens,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn login(&self, body: Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/api/auth/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn me(&self, token: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri("/api/users/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn provider_token(subject: &str, name: &str) -> String {
    #[derive(Serialize)]
    struct Provided<'a> {
        sub: &'a str,
        name: &'a str,
        exp: i64,
    }

    encode(
        &Header::new(Algorithm::HS256),
        &Provided {
            sub: subject,
            name,
            exp: (OffsetDateTime::now_utc() + Duration::hours(1)).unix_timestamp(),
        },
        &EncodingKey::from_secret(PROVIDER_SECRET.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn login_creates_the_user_once_and_issues_tokens() {
    let app = TestApp::new();

    let first = app
        .login(json!({"authToken": provider_token("provider|1", "Ada")}))
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let token = body_json(first).await["authToken"]
        .as_str()
        .unwrap()
        .to_string();

    let me = app.me(&token).await;
    assert_eq!(me.status(), StatusCode::OK);
    let user = body_json(me).await;
    assert_eq!(user["authProviderId"], "provider|1");
    assert_eq!(user["name"], "Ada");

    // second login maps to the same user
    let second = app
        .login(json!({"authToken": provider_token("provider|1", "Ada")}))
        .await;
    let token = body_json(second).await["authToken"]
        .as_str()
        .unwrap()
        .to_string();
    let again = body_json(app.me(&token).await).await;
    assert_eq!(again["id"], user["id"]);
    assert_eq!(again["createdAt"], user["createdAt"]);
}

#[tokio::test]
async fn login_rejects_bad_requests_with_a_slug() {
    let app = TestApp::new();

    let missing = app.login(json!({"token": "x"})).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(missing).await["slug"], "invalid_request");

    let unverifiable = app.login(json!({"authToken": "not-a-jwt"})).await;
    assert_eq!(unverifiable.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(unverifiable).await["slug"], "invalid_auth_token");
}

#[tokio::test]
async fn protected_routes_need_a_valid_bearer_token() {
    let app = TestApp::new();

    let anonymous = app
        .send(
            Request::builder()
                .uri("/api/users/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(anonymous).await["slug"], "missing_credentials");

    let garbage = app.me("garbage").await;
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    assert!(garbage.headers().get("token-expired").is_none());

    let expired_token = app
        .tokens
        .issue_at(Uuid::now_v7(), OffsetDateTime::now_utc() - Duration::days(31))
        .unwrap();
    let expired = app.me(&expired_token).await;
    assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(expired.headers().get("token-expired").unwrap(), "true");

    // valid token for a user that was never created
    let unknown = app.me(&app.tokens.issue(Uuid::now_v7()).unwrap()).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn liveness_fails_until_components_report() {
    let liveness = HealthRegistry::new("liveness");
    let state = AppState {
        tokens: Arc::new(TokenIssuer::new("service-secret", "bazaar", 30)),
        identity: Arc::new(SharedSecretVerifier::new(PROVIDER_SECRET)),
        users: Arc::new(MemoryUserStore::new()),
        liveness: liveness.clone(),
    };
    let router = app(state);
    let liveness_request = || {
        Request::builder()
            .uri("/_liveness")
            .body(Body::empty())
            .unwrap()
    };

    let response = router.clone().oneshot(liveness_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let handle = liveness.register("kafka-consumer-listings", Duration::seconds(30));
    handle.report_healthy();
    let response = router.oneshot(liveness_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
