// crates/molt-daemon/src/main.rs
//
// Binary entrypoint for the Molt daemon.
//
// Loads configuration, initializes tracing, and dispatches one operator
// command: a full re-embedding run, a manual alias cutover, or a drift scan
// of an existing namespace.

mod commands;
mod config;
mod embedder;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use config::MoltConfig;
use tokio_util::sync::CancellationToken;

/// Molt daemon: drift monitoring and zero-downtime re-embedding.
#[derive(Parser, Debug)]
#[command(name = "molt-daemon", version = "0.1.0", about = "Molt re-embedding daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.molt/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the shadow namespace, gate it, and promote it on a pass.
    Reembed {
        /// Canary file overriding `reembed.canary_path`.
        #[arg(long)]
        canaries: Option<String>,
    },
    /// Point an alias at a namespace.
    Cutover {
        #[arg(long)]
        alias: String,
        #[arg(long)]
        target: String,
        /// Recorded with the switch for audit.
        #[arg(long, default_value_t = 0.0)]
        min_recall_delta: f64,
    },
    /// Fingerprint the stored vectors of a namespace.
    DriftScan {
        #[arg(long)]
        namespace: String,
        /// Stop after this many points.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = expand_tilde(&args.config);
    let loaded = MoltConfig::load(&config_path);
    let config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => MoltConfig::default(),
    };

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match &loaded {
        Ok(_) => tracing::info!("Loaded configuration from {}", config_path),
        Err(e) => tracing::warn!(
            "Could not load config from {}: {}. Using defaults.",
            config_path,
            e
        ),
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling at the next phase boundary");
            ctrl_c.cancel();
        }
    });

    let ok = match args.command {
        Command::Reembed { canaries } => commands::reembed(&config, canaries, cancel).await?,
        Command::Cutover {
            alias,
            target,
            min_recall_delta,
        } => commands::cutover(&config, &alias, &target, min_recall_delta).await?,
        Command::DriftScan { namespace, limit } => {
            commands::drift_scan(&config, &namespace, limit, cancel).await?
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Expand a leading `~/` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let args = Args::parse_from([
            "molt-daemon",
            "cutover",
            "--alias",
            "memories",
            "--target",
            "memories_v2",
        ]);
        match args.command {
            Command::Cutover {
                alias,
                target,
                min_recall_delta,
            } => {
                assert_eq!(alias, "memories");
                assert_eq!(target, "memories_v2");
                assert_eq!(min_recall_delta, 0.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let args = Args::parse_from(["molt-daemon", "drift-scan", "--namespace", "n", "--limit", "5"]);
        assert!(matches!(
            args.command,
            Command::DriftScan { ref namespace, limit: Some(5) } if namespace == "n"
        ));
    }

    #[test]
    fn tilde_expands_only_at_start() {
        assert_eq!(expand_tilde("/etc/molt.toml"), "/etc/molt.toml");
        assert_eq!(expand_tilde("a/~/b"), "a/~/b");
        if dirs::home_dir().is_some() {
            assert!(!expand_tilde("~/x").starts_with('~'));
        }
    }
}
