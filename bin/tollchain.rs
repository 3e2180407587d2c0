use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use tollchain::{
    pubsub::Notifier, start_poller, Database, LogNotifier, NotificationDispatcher,
    RedpandaNotifier, Settings,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings =
        Settings::new().context("Failed to load config.yaml. Please ensure it exists and is valid")?;
    settings.validate().context("Invalid configuration")?;

    let db = Database::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;

    let cancellation_token = CancellationToken::new();

    // Notifications are delivered off the poller's task
    let notifier: Arc<dyn Notifier> = match settings
        .redpanda
        .as_ref()
        .and_then(RedpandaNotifier::new)
    {
        Some(redpanda) => Arc::new(redpanda),
        None => {
            info!("Redpanda disabled, notifications will be logged only");
            Arc::new(LogNotifier)
        },
    };
    let (notifications, dispatcher) =
        NotificationDispatcher::channel(notifier, settings.notifications.channel_capacity);

    let dispatcher_token = cancellation_token.child_token();
    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher.run(dispatcher_token).await {
            error!("Notification dispatcher failed: {:#}", e);
        }
    });

    let poller = start_poller(&settings, &db, notifications.clone(), &cancellation_token)
        .await
        .context("Failed to start chain poller")?;

    if poller.is_none() {
        warn!("Chain poller disabled (mock mode)");
    }

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("TollChain running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    // Poller first so no new notifications are produced after the dispatcher drains
    if let Some(poller) = poller {
        info!("Waiting for chain poller to stop...");
        poller.stop().await;
    }

    info!("Shutting down notification dispatcher...");
    notifications.shutdown().await;
    let _ = dispatcher_handle.await;

    cancellation_token.cancel();

    info!("Shutdown complete");
    Ok(())
}
