use clap::{Parser, Subcommand};
use dtfwd::config;
use dtfwd::dataplane::{log_statistics, spawn_workers, Engine};
use dtfwd::telemetry::init_logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dtfwd")]
#[command(about = "Multi-core IPv4 forwarding engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the forwarding engine
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print config.toml with every default filled in
    Lock {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Write the lock to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate config.toml without generating lock file
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config { action }) => {
            init_logging(None);
            match action {
                ConfigAction::Lock { config, output } => cmd_config_lock(&config, output.as_deref()),
                ConfigAction::Validate { config } => cmd_config_validate(&config),
            }
        }
        Some(Commands::Run { config }) => cmd_run(&config),
        None => cmd_run(Path::new("config.toml")),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn load_validated(config_path: &Path) -> Result<config::Config, String> {
    let cfg = config::load(config_path)
        .map_err(|e| format!("Failed to load {}: {}", config_path.display(), e))?;
    let result = config::validate(&cfg);
    result.print_diagnostics();
    if result.has_errors() {
        return Err(format!(
            "{} has {} error(s)",
            config_path.display(),
            result.errors.len()
        ));
    }
    Ok(cfg)
}

fn cmd_config_lock(config_path: &Path, output: Option<&Path>) -> Result<(), String> {
    let cfg = load_validated(config_path)?;
    let lock = config::generate_lock(&cfg);
    let content =
        toml::to_string_pretty(&lock).map_err(|e| format!("Failed to serialize lock: {}", e))?;
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            eprintln!("Generated {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    load_validated(config_path)?;
    println!("{} is valid", config_path.display());
    Ok(())
}

fn cmd_run(config_path: &Path) -> Result<(), String> {
    let cfg = config::load(config_path)
        .map_err(|e| format!("Failed to load {}: {}", config_path.display(), e))?;
    init_logging(cfg.logging.as_ref());

    let result = config::validate(&cfg);
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    if result.has_errors() {
        return Err(result.errors.join("; "));
    }

    info!("dtfwd starting from {}", config_path.display());
    let engine = Engine::from_config(&cfg, dtfwd::capture::open).map_err(|e| e.to_string())?;
    let engine = Arc::new(engine);
    let handles = spawn_workers(engine.clone()).map_err(|e| e.to_string())?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;
    rt.block_on(wait_for_shutdown());

    info!("shutting down");
    engine.stop();
    for handle in handles {
        if handle.join().is_err() {
            warn!("worker thread panicked");
        }
    }
    log_statistics(&engine);
    Ok(())
}

async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = terminate.recv() => info!("SIGTERM received"),
    }
}
