mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use lobby_network::{
    GameOutcome, MatchFound, NetworkConfig, NetworkManager, PortRange, game_result_handler,
    match_found_handler,
};

/// Time given to the first discovery round before queued users are submitted.
const SETTLE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "lobby", version, about = "Peer-to-peer matchmaking lobby node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a node until Ctrl-C.
    Run(RunArgs),
    /// Write a default config file.
    InitConfig {
        /// Config file path (defaults to ~/.lobby/network.json).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Config file path (defaults to ~/.lobby/network.json).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Preferred listening port.
    #[arg(long)]
    port: Option<u16>,
    /// Seed node as HOST:PORT. Repeatable.
    #[arg(long = "seed")]
    seeds: Vec<String>,
    /// Players per session.
    #[arg(long)]
    match_size: Option<usize>,
    /// Request a match for this user once the node is up. Repeatable.
    #[arg(long = "user")]
    users: Vec<String>,
    /// Seconds between status log lines.
    #[arg(long, default_value_t = 30)]
    status_secs: u64,
    /// Directory for daily log files (defaults to ~/.lobby/logs).
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn default_config_path() -> Result<PathBuf> {
    Ok(logging::base_dir()?.join("network.json"))
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

/// Layer command-line flags over the loaded config.
fn apply_overrides(mut config: NetworkConfig, args: &RunArgs) -> NetworkConfig {
    if let Some(port) = args.port {
        if !config.port_range.contains(port) {
            config.port_range = PortRange::new(
                config.port_range.start.min(port),
                config.port_range.end.max(port.saturating_add(1)),
            );
        }
        config.preferred_port = Some(port);
    }
    config.seed_nodes.extend(args.seeds.iter().cloned());
    if let Some(match_size) = args.match_size {
        config.match_size = match_size;
    }
    config
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    NetworkConfig::default()
        .save_to_file(path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let path = resolve_config_path(args.config.clone())?;
    let config = apply_overrides(NetworkConfig::load_or_default(&path), &args);
    let mut node = NetworkManager::new(config).context("invalid network config")?;

    node.on_match_found(match_found_handler(|event: MatchFound| async move {
        info!("Match found: session {} players {:?}", event.session_id, event.players);
    }))
    .await;
    node.on_game_result(game_result_handler(|outcome: GameOutcome| async move {
        info!("Game over: session {} won by {}", outcome.session_id, outcome.winner_id);
    }))
    .await;

    let port = node.start().await.context("start node")?;
    info!("Node {} listening on port {port}", node.node_id());

    if !args.users.is_empty() {
        tokio::time::sleep(SETTLE).await;
        for user in &args.users {
            let request_id = node.request_match(user.as_str()).await?;
            info!("Queued {user} as request {request_id}");
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.status_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = node.status().await;
                match serde_json::to_string(&status) {
                    Ok(json) => info!("Status: {json}"),
                    Err(e) => warn!("Failed to encode status: {e}"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Ctrl-C handler failed: {e}");
                }
                break;
            }
        }
    }

    node.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::InitConfig { config, force } => init_config(&resolve_config_path(config)?, force),
        Command::Run(args) => {
            let _guard = match &args.log_dir {
                Some(dir) => logging::init_logging_in(dir)?,
                None => logging::init_logging()?,
            };
            run(args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "lobby",
            "run",
            "--port",
            "8005",
            "--seed",
            "10.0.0.2:8000",
            "--seed",
            "10.0.0.3:8000",
            "--match-size",
            "4",
            "--log-dir",
            "/tmp/lobby-logs",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.port, Some(8005));
        assert_eq!(args.seeds.len(), 2);
        assert_eq!(args.match_size, Some(4));
        assert_eq!(args.status_secs, 30);
        assert_eq!(args.log_dir, Some(PathBuf::from("/tmp/lobby-logs")));
    }

    #[test]
    fn test_overrides_apply() {
        let args = RunArgs {
            port: Some(9000),
            seeds: vec!["10.0.0.2:8000".to_string()],
            match_size: Some(4),
            ..RunArgs::default()
        };
        let config = apply_overrides(NetworkConfig::default(), &args);

        assert_eq!(config.preferred_port, Some(9000));
        assert!(config.port_range.contains(9000));
        assert_eq!(config.port_range.start, 8000);
        assert_eq!(config.seed_nodes, vec!["10.0.0.2:8000"]);
        assert_eq!(config.match_size, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let config = apply_overrides(NetworkConfig::default(), &RunArgs::default());
        assert_eq!(config.preferred_port, None);
        assert_eq!(config.match_size, 3);
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("network.json");

        init_config(&path, false).unwrap();
        assert!(path.exists());
        assert!(init_config(&path, false).is_err());
        assert!(init_config(&path, true).is_ok());

        let loaded = NetworkConfig::load_or_default(&path);
        assert_eq!(loaded.match_size, NetworkConfig::default().match_size);
    }
}
