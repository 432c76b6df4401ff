use browser_session_launcher::cleanup;
use browser_session_launcher::config::Config;
use browser_session_launcher::logging;
use browser_session_launcher::manager::SessionManager;
use browser_session_launcher::queue::{self, local::LocalQueueSource, sqs::SqsQueueSource};
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            process::exit(1);
        }
    };

    let _log_guard = logging::init(&config.logging);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        process::exit(1);
    }

    tracing::info!(config = %config.show_masked(), "starting browser session launcher worker");

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "worker exited with an error");
        process::exit(1);
    }
}

async fn run(config: Config) -> browser_session_launcher::Result<()> {
    let is_local = config.is_local_queue();
    let profile_basedir = std::env::temp_dir();
    let manager = Arc::new(SessionManager::new(config));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweep_handle = tokio::spawn(cleanup::run_sweep_loop(Arc::clone(&manager), shutdown_rx.clone()));
    let reaper_handle = tokio::spawn(cleanup::run_profile_reaper(
        Arc::clone(&manager),
        profile_basedir.clone(),
        shutdown_rx.clone(),
    ));

    let queue_handle = if is_local {
        let dir = profile_basedir.clone();
        let source: Arc<dyn queue::QueueSource> = Arc::new(LocalQueueSource::new(dir.clone()));
        let run_manager = Arc::clone(&manager);
        let run_shutdown = shutdown_rx.clone();
        let status_manager = Arc::clone(&manager);
        let status_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::join!(
                queue::run(run_manager, source, run_shutdown),
                queue::local::poll_status_requests(status_manager, dir, status_shutdown),
            );
        })
    } else {
        let queue_url = manager.config().queue.request_queue_url.clone();
        let region = manager.config().queue.aws_region.clone();
        let wait_time_seconds = manager.config().queue.sqs_wait_time_seconds;
        let source = SqsQueueSource::new(queue_url, region, wait_time_seconds).await?;
        let source: Arc<dyn queue::QueueSource> = Arc::new(source);
        tokio::spawn(queue::run(Arc::clone(&manager), source, shutdown_rx.clone()))
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping adapters");
    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(browser_session_launcher::timeouts::secs::SHUTDOWN_GRACE),
        async {
            let _ = sweep_handle.await;
            let _ = reaper_handle.await;
            let _ = queue_handle.await;
        },
    )
    .await;

    manager.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c");
    }
}
