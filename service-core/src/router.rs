use std::future::ready;
use std::sync::Arc;

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;
use health::HealthRegistry;
use tower_http::trace::TraceLayer;

use crate::auth::user::UserStore;
use crate::auth::{current_user, login, IdentityVerifier, TokenIssuer};
use crate::metrics::track_metrics;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub tokens: Arc<TokenIssuer>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub users: Arc<dyn UserStore>,
    pub liveness: HealthRegistry,
}

async fn index() -> &'static str {
    "service-core"
}

/// API routes plus liveness. The Prometheus route is merged in by the caller
/// since the recorder is process-global.
pub fn app(state: AppState) -> Router {
    let liveness = state.liveness.clone();

    Router::new()
        .route("/", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/api/auth/token", post(login))
        .route("/api/users/me", get(current_user))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state)
}
