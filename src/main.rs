use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;
use vaportrail::*;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        port = app_config.http_port,
        db = %app_config.db_path,
        "starting vaportrail"
    );

    // Fatal if the database cannot be opened or migrated.
    let store = store::Store::connect(&app_config.db_path).await?;
    let clock: Arc<dyn clock::Clock> = Arc::new(clock::SystemClock);
    let shutdown = CancellationToken::new();

    let (sample_tx, sample_rx) =
        tokio::sync::mpsc::channel(scheduler::SAMPLE_CHANNEL_CAPACITY);
    let writer_handle = scheduler::writer::spawn_batch_writer(
        sample_rx,
        store.clone(),
        scheduler::writer::BatchWriterConfig::default(),
        shutdown.clone(),
    );

    let sched = Arc::new(scheduler::Scheduler::new(
        store.clone(),
        Arc::new(probe::TransportRunner),
        clock.clone(),
        sample_tx,
    ));
    sched.start().await?;

    let rollup_handle =
        scheduler::rollup::spawn_rollup_manager(store.clone(), clock.clone(), shutdown.clone());
    let retention_handle = scheduler::retention::spawn_retention_manager(
        store.clone(),
        clock.clone(),
        app_config.vacuum.clone(),
        shutdown.clone(),
    );

    let app = web::app(store, sched.clone(), clock);
    let addr = format!("0.0.0.0:{}", app_config.http_port);
    // Fatal if the port cannot be bound.
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("received shutdown signal");
            sched.shutdown();
            shutdown.cancel();
            let _ = rollup_handle.await;
            let _ = retention_handle.await;
            let _ = writer_handle.await;
        }
    }

    Ok(())
}
