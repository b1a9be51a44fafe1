mod cli;
mod run;

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use boostctl_config::{Config, Logging};
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let cfg = load_config(&cli)?;
    init_logging(&cli, &cfg.logging);

    match cli.cmd {
        Commands::CheckConfig => {
            println!("config OK: {}", cli.config.display());
            Ok(())
        }
        Commands::Calibrate => {
            let summary = run::calibrate_only(&cfg)?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Run {
            duration_ms,
            speed_kph,
            rpm,
            gear,
            load_raw,
            silent_master,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
                .wrap_err("failed to install Ctrl-C handler")?;

            let opts = run::RunOptions {
                duration_ms,
                speed_kph,
                rpm,
                gear,
                load_raw,
                silent_master,
            };
            let summary = run::run(&cfg, opts, shutdown)?;
            print_summary(&summary);
            Ok(())
        }
    }
}

/// Load and validate the config file. A missing file at the default path
/// falls back to built-in defaults; an explicitly given missing path is an
/// error.
fn load_config(cli: &Cli) -> Result<Config> {
    if cli.config.exists() {
        let text = std::fs::read_to_string(&cli.config)
            .wrap_err_with(|| format!("failed to read {}", cli.config.display()))?;
        let cfg = boostctl_config::load_toml(&text)
            .wrap_err_with(|| format!("failed to parse {}", cli.config.display()))?;
        cfg.validate()
            .wrap_err_with(|| format!("invalid config {}", cli.config.display()))?;
        Ok(cfg)
    } else if cli.config == Path::new("etc/boostctl.toml") {
        Ok(Config::default())
    } else {
        eyre::bail!("config file not found: {}", cli.config.display());
    }
}

fn init_logging(cli: &Cli, logging: &Logging) {
    let level = if cli.log_level != "info" {
        cli.log_level.clone()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>> = Vec::new();
    if cli.json {
        layers.push(fmt::layer().json().boxed());
    } else {
        layers.push(fmt::layer().compact().boxed());
    }

    if let Some(file) = &logging.file {
        let path = Path::new(file);
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = path.file_name().unwrap_or_else(|| OsStr::new("boostctl.log"));
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).with(filter).init();
}

fn print_summary(summary: &serde_json::Value) {
    if JSON_MODE.get().copied().unwrap_or(false) {
        println!("{summary}");
    } else {
        println!("{summary:#}");
    }
}
