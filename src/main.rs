// printwatch binary: wires the watchdog to a printer and serves the control API
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use printwatch::gcode_store::analyze_bounds;
use printwatch::recovery::SerialLogHistory;
use printwatch::web::{AppStateInner, create_router};
use printwatch::{Collaborators, GcodeStore, JobRegistry, JobTracker, LogNotifier, Supervisor, TemperatureHold};
use printwatch_shared::Config;
use printwatch_shared::config::load_config;
use printwatch_simulator::SimulatedPrinter;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "printwatch", version, about = "Print-integrity watchdog for a 3D printer")]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Play this G-code file (looked up in the storage directory) on the
    /// simulated printer
    #[arg(long, value_name = "FILE")]
    simulate: Option<String>,
}

/// Configuration from `path`, or the built-in defaults.
fn settings(path: Option<&Path>) -> Result<Config, BoxError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    load_config(&path.to_string_lossy())
        .map_err(|e| format!("Failed to load config from '{}': {}", path.display(), e).into())
}

const PHYSICS_PERIOD: Duration = Duration::from_millis(100);
const LINE_PERIOD: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let config = match settings(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().init();
            tracing::error!("{}", e);
            return Err(e);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Starting printwatch {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Material: {} | max pause: {}h | out of bounds: {:?}",
        config.watchdog.material,
        config.watchdog.max_pause_duration_hours,
        config.watchdog.out_of_bounds_action
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let serial_log = config
        .recovery
        .serial_log
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("printwatch-serial.log"));
    if args.simulate.is_some() {
        // Fresh transcript for this run
        tokio::fs::write(&serial_log, "").await?;
    }

    tracing::info!("Using the simulated printer");
    let printer = Arc::new(
        SimulatedPrinter::new()
            .with_events(events_tx)
            .with_serial_log(&serial_log)
            .with_sensor_noise(0.5),
    );

    let registry = JobRegistry::new();
    let collaborators = Collaborators {
        telemetry: printer.clone(),
        actuator: printer.clone(),
        jobs: Arc::new(registry.clone()),
        history: Arc::new(SerialLogHistory::new(&serial_log, config.recovery.history_lines)),
        notifier: Arc::new(LogNotifier::new(&config.notify)),
    };
    let supervisor = Arc::new(Supervisor::new(&config, collaborators));

    let watchdog = supervisor.clone().spawn(shutdown_tx.subscribe());
    let pump = JobTracker::new(registry.clone(), supervisor.clone()).spawn(events_rx, shutdown_tx.subscribe());
    {
        let printer = printer.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { printer.run_physics(PHYSICS_PERIOD, shutdown).await });
    }

    if let Some(file_name) = &args.simulate {
        let store = GcodeStore::new(&config.storage.gcode_dir);
        let lines = store.read_lines(file_name).await.map_err(|e| {
            tracing::error!("Cannot load '{}' from {}: {}", file_name, store.root().display(), e);
            Box::new(e) as BoxError
        })?;
        let bounds = analyze_bounds(&lines);
        if bounds.is_none() {
            tracing::warn!("No moves found in {}; bounds check disabled for this job", file_name);
        }
        printer.start_print(file_name, bounds);
        let player = printer.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { player.play(lines, LINE_PERIOD, shutdown).await });
    }

    let hold = TemperatureHold::new(
        printer.clone(),
        printer.clone(),
        config.temperature_hold.interval(),
        config.watchdog.collaborator_timeout(),
    );
    let app = create_router(Arc::new(AppStateInner {
        supervisor,
        jobs: registry,
        hold,
        hold_tolerance: config.temperature_hold.default_tolerance,
    }));

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Control API listening on http://{}", listener.local_addr()?);
    let mut server_shutdown = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        })
        .await?;

    let _ = tokio::join!(watchdog, pump);
    tracing::info!("printwatch stopped");
    Ok(())
}
