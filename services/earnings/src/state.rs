use std::sync::Arc;

use payday_core::health::Readiness;

use crate::infra::db::{DbPayoutRepository, DbWorkerRepository};
use crate::infra::notifier::OutboxNotifier;
use crate::infra::stripe::StripeClient;
use crate::usecase::reconcile::WebhookReconciler;

/// Shared application state passed to every handler via axum `State`.
pub struct AppState<P, W, G, N> {
    pub reconciler: Arc<WebhookReconciler<P, W, G, N>>,
    pub readiness: Readiness,
}

impl<P, W, G, N> Clone for AppState<P, W, G, N> {
    fn clone(&self) -> Self {
        Self {
            reconciler: Arc::clone(&self.reconciler),
            readiness: self.readiness.clone(),
        }
    }
}

/// State wired to the production adapters.
pub type EarningsState =
    AppState<DbPayoutRepository, DbWorkerRepository, StripeClient, OutboxNotifier>;
