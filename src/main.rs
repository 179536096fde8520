use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ovenbell::app::alerts::{AlertHub, LogAlertSink};
use ovenbell::app::order_notifier::{
    BacklogLoader, OrderFeed, PendingOrderNotifier, TracingErrorSink,
};
use ovenbell::config::{AppConfig, AppMode};
use ovenbell::http;
use ovenbell::infra::{db::Db, order_feed::PgOrderFeed, order_store::PgOrderStore};
use ovenbell::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config).await?;
    let pg_feed = PgOrderFeed::new(
        db.clone(),
        config.orders_channel.clone(),
        config.feed_buffer_size,
    );
    if let Err(err) = pg_feed.verify_trigger_channel().await {
        tracing::warn!(error = ?err, "could not check the order trigger channel");
    }
    let orders_feed: Arc<dyn OrderFeed> = Arc::new(pg_feed);
    let backlog: Arc<dyn BacklogLoader> = Arc::new(PgOrderStore::new(db.clone()));

    match config.app_mode {
        AppMode::Api => {
            let alerts = AlertHub::new(config.alert_stream_capacity);
            let notifier = Arc::new(PendingOrderNotifier::new(
                Arc::new(alerts.clone()),
                Arc::new(TracingErrorSink),
                config.notifier_options(),
            ));

            let state = AppState {
                db,
                alerts,
                notifier: Arc::clone(&notifier),
                orders_feed,
                backlog,
            };
            state.start_notifier();

            let app: Router = http::router(state).layer(TraceLayer::new_for_http());
            let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
            tracing::info!("listening on {}", config.http_addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            notifier.stop();
        }
        AppMode::Listener => {
            tracing::info!("starting listener mode");
            let notifier = PendingOrderNotifier::new(
                Arc::new(LogAlertSink),
                Arc::new(TracingErrorSink),
                config.notifier_options(),
            );
            notifier.start(orders_feed, backlog);
            shutdown_signal().await;
            notifier.stop();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
