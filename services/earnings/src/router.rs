use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use payday_core::health::health_routes;
use payday_core::middleware::request_id_layer;

use crate::domain::repository::{
    NotificationPort, PaymentGateway, PayoutRepository, WorkerRepository,
};
use crate::handlers::webhook::{stripe_webhook, webhook_check};
use crate::state::AppState;

pub fn build_router<P, W, G, N>(state: AppState<P, W, G, N>) -> Router
where
    P: PayoutRepository + 'static,
    W: WorkerRepository + 'static,
    G: PaymentGateway + 'static,
    N: NotificationPort + 'static,
{
    let readiness = state.readiness.clone();
    Router::new()
        // Health
        .merge(health_routes(readiness))
        // Processor webhooks
        .route("/earnings/stripe/webhook", post(stripe_webhook::<P, W, G, N>))
        .route(
            "/earnings/stripe/webhook/check",
            get(webhook_check::<P, W, G, N>),
        )
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
