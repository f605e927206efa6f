//! The mailgate daemon: listeners feeding a worker pool until told to stop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use miette::{IntoDiagnostic, Result, WrapErr};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mailgate_server::{Config, Context, Dispatcher, Listener, Pipeline, SmtpReinjector};

/// Mail filtering gateway speaking milter and after-queue SMTP
#[derive(Debug, Parser)]
#[command(name = "mailgate", version, about)]
struct Args {
    /// Configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "/etc/mailgate/mailgate.toml"
    )]
    config: PathBuf,
    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
    /// More logging, repeat for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed loading {}", args.config.display()))?;
    if args.check_config {
        println!("{}: configuration ok", args.config.display());
        return Ok(());
    }

    init_logging(&config.log_level, args.verbose);
    info!(config = %args.config.display(), "Starting mailgate");

    std::fs::create_dir_all(&config.spool_dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed creating spool dir {}", config.spool_dir.display()))?;

    let dispatcher = Arc::new(
        Dispatcher::new(config.pool.clone(), context(&config))
            .into_diagnostic()
            .wrap_err("Failed starting worker pool")?,
    );

    let (stop, stopped) = watch::channel(false);
    let mut serving = Vec::with_capacity(config.listeners.len());
    for listener_config in &config.listeners {
        let listener = Listener::bind(listener_config)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed binding {}", listener_config.address))?;
        let mut stopped = stopped.clone();
        let shutdown = async move {
            let _ = stopped.changed().await;
        };
        serving.push(tokio::spawn(listener.serve(dispatcher.clone(), shutdown)));
    }

    let mut hangup = signal(SignalKind::hangup()).into_diagnostic()?;
    let mut interrupt = signal(SignalKind::interrupt()).into_diagnostic()?;
    let mut terminate = signal(SignalKind::terminate()).into_diagnostic()?;
    // Reloads wait for the old pool's sessions, signals keep being served
    let mut reloads = JoinSet::new();
    loop {
        tokio::select! {
            _ = hangup.recv() => {
                reloads.spawn(reload(args.config.clone(), dispatcher.clone()));
            }
            Some(_) = reloads.join_next(), if !reloads.is_empty() => {}
            _ = interrupt.recv() => break,
            _ = terminate.recv() => break,
        }
    }

    info!("Shutting down");
    let _ = stop.send(true);
    for listener in serving {
        if let Err(e) = listener.await {
            error!("Listener failed: {e}");
        }
    }
    dispatcher.shutdown().await;
    while let Some(res) = reloads.join_next().await {
        if let Err(e) = res {
            error!("Reload failed: {e}");
        }
    }
    info!("mailgate stopped");
    Ok(())
}

fn init_logging(level: &str, verbose: u8) {
    let fallback = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}

fn context(config: &Config) -> Context {
    Context {
        settings: config.into(),
        scanner: Arc::new(Pipeline::new()),
        reinjector: Arc::new(SmtpReinjector::from_settings(&config.reinject)),
    }
}

/// Re-read the configuration and replace the pool; a broken file keeps the
/// running one
async fn reload(path: PathBuf, dispatcher: Arc<Dispatcher>) {
    info!(config = %path.display(), "Reloading");
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("Not reloading, {e}");
            return;
        }
    };
    match dispatcher.reload(config.pool.clone(), context(&config)).await {
        Ok(()) => info!(
            backend = %config.pool.backend,
            workers = config.pool.workers,
            "Reloaded worker pool"
        ),
        Err(e) => error!("Reload failed, keeping the current pool: {e}"),
    }
}
