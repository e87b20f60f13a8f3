use std::{str::FromStr, sync::Arc, time::Duration};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courtside::{
    api,
    config::Settings,
    payments::{PaymentGateway, StripeGateway},
    service::{payment_service::PaymentService, ServiceContext},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courtside=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!("Starting Courtside server on {}:{}", settings.server.host, settings.server.port);

    // WAL lets readers proceed while a booking transaction holds the write lock
    let connect_options = SqliteConnectOptions::from_str(&settings.database.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect_with(connect_options)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let gateway: Option<Arc<dyn PaymentGateway>> = if settings.stripe.enabled {
        match (settings.stripe.secret_key.clone(), settings.stripe.webhook_secret.clone()) {
            (Some(secret_key), Some(webhook_secret)) => {
                tracing::info!(
                    fee_bps = settings.stripe.platform_fee_bps,
                    "Stripe payment processing enabled"
                );
                Some(Arc::new(StripeGateway::new(secret_key, webhook_secret)))
            }
            _ => {
                tracing::warn!("Stripe enabled but missing configuration");
                None
            }
        }
    } else {
        tracing::info!("Stripe payment processing disabled");
        None
    };

    let service_context = Arc::new(ServiceContext::new(db_pool.clone(), &settings, gateway));

    spawn_payment_sweeper(
        service_context.payment_service.clone(),
        Duration::from_secs(settings.payments.sweep_interval_secs.max(1)),
    );

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically clear payment holds abandoned mid-checkout.
fn spawn_payment_sweeper(payment_service: Arc<PaymentService>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = payment_service.release_stale_payments().await {
                tracing::error!("Stale payment sweep failed: {}", e);
            }
        }
    });
}
