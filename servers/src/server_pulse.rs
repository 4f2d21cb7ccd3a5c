use anyhow::Result;
use lib_pulse::activity::{ActivityNotifier, DiscordIpcFactory};
use lib_pulse::configs::SettingsStore;
use lib_pulse::core::Dispatcher;
use lib_pulse::ingestors::{StreamClient, WsConnector};
use std::sync::Arc;
use tokio::signal;

mod pulse_logic;
use pulse_logic::config::{self, ConfigOrigin};
use pulse_logic::{console::ConsoleSink, downstream, logger, pipeline::Pipeline, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (config, origin) = config::load_config();
    let log_path = logger::setup_logging(&config.log_dir(), config.log_level())?;
    log::info!("Logging to {}", log_path.display());
    match origin {
        ConfigOrigin::File(path) => log::info!("Loaded config file {}", path.display()),
        ConfigOrigin::Missing(path) => log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        ),
        ConfigOrigin::Invalid(path, reason) => log::warn!(
            "Failed to parse config file {}: {}. Falling back to other sources.",
            path.display(),
            reason
        ),
    }

    let settings = Arc::new(SettingsStore::new(config.settings()));
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.add_sink("console", Arc::new(ConsoleSink));

    let client = StreamClient::new(WsConnector, settings.clone(), config.stream_config());
    let notifier = ActivityNotifier::new(DiscordIpcFactory, settings.clone());
    let pipeline = Pipeline::new(client, notifier, settings.clone(), dispatcher.clone());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let (control_tx, control_rx) = tokio::sync::mpsc::unbounded_channel();
    let app_state = AppState::new(settings, dispatcher, pipeline.status_receiver(), control_tx);

    let pipeline_handle = tokio::spawn(pipeline.run(control_rx, shutdown_tx.subscribe()));
    let mut downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for a shutdown signal, or for the HTTP server to die on its own.
    let early_exit = tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
            None
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
            None
        }
        result = &mut downstream_handle => Some(result),
    };

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    let downstream_result = match early_exit {
        Some(result) => result,
        None => downstream_handle.await,
    };
    match downstream_result {
        Ok(Err(e)) => log::error!("Downstream server failed: {:#}", e),
        Err(e) => log::error!("Downstream task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Err(e) = pipeline_handle.await {
        log::error!("Pipeline task failed: {}", e);
    }

    log::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Could not install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
