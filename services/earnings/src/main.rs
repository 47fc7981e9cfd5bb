use std::sync::Arc;

use sea_orm::Database;
use tracing::info;

use payday_core::config::Config;
use payday_core::health::Readiness;
use payday_core::tracing::init_tracing;

use payday_earnings::config::EarningsConfig;
use payday_earnings::domain::signature::WebhookSecrets;
use payday_earnings::infra::db::{DbPayoutRepository, DbWorkItemRepository, DbWorkerRepository};
use payday_earnings::infra::notifier::OutboxNotifier;
use payday_earnings::infra::stripe::StripeClient;
use payday_earnings::jobs::{JobSchedule, spawn_aggregation_job, spawn_processing_job};
use payday_earnings::router::build_router;
use payday_earnings::state::EarningsState;
use payday_earnings::usecase::aggregate::AggregatePayoutsUseCase;
use payday_earnings::usecase::process::{PayoutProcessor, RetryPolicy};
use payday_earnings::usecase::reconcile::WebhookReconciler;
use payday_earnings::usecase::recovery::{BalanceRecovery, RecoveryConfig};
use payday_earnings::usecase::webhook_check::WebhookCheckRegistry;

#[tokio::main]
async fn main() {
    // sqlx logs every statement at info.
    init_tracing("info,sqlx=warn");

    let config = EarningsConfig::from_env().expect("invalid earnings configuration");
    let generated_by = config.generated_by();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let gateway = StripeClient::new(&config.stripe_api_base, &config.stripe_secret_key)
        .expect("failed to build payment processor client");

    let processor = Arc::new(PayoutProcessor {
        payouts: DbPayoutRepository { db: db.clone() },
        workers: DbWorkerRepository { db: db.clone() },
        gateway,
        notifier: OutboxNotifier { db: db.clone() },
        generated_by: generated_by.clone(),
        retry_policy: RetryPolicy::default(),
    });
    let aggregate = Arc::new(AggregatePayoutsUseCase {
        payouts: DbPayoutRepository { db: db.clone() },
        work_items: DbWorkItemRepository { db },
        use_short_pay_period: config.use_short_pay_period,
    });

    let reconciler = WebhookReconciler {
        processor: Arc::clone(&processor),
        recovery: BalanceRecovery::new(Arc::clone(&processor), RecoveryConfig::default()),
        secrets: Arc::new(WebhookSecrets::new(
            config.stripe_webhook_platform_secret.clone(),
            config.stripe_webhook_connect_secret.clone(),
        )),
        checks: Arc::new(WebhookCheckRegistry::new(&generated_by)),
    };
    let readiness = Readiness::default();
    let state = EarningsState {
        reconciler: Arc::new(reconciler),
        readiness: readiness.clone(),
    };

    // Background jobs
    let schedule = JobSchedule::from_config(&config);
    spawn_aggregation_job(aggregate, schedule);
    spawn_processing_job(processor, schedule);

    // HTTP server
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.earnings_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    readiness.mark_ready();
    info!(%generated_by, "earnings service listening on {addr}");
    axum::serve(listener, router).await.expect("server error");
}
