//! chem-hostd - sensor host daemon
//!
//! Loads the bus configuration, wires every bus to the engine and prints
//! accepted samples until interrupted.

mod report;
mod wiring;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chem_bus::PortScanner;
use chem_engine::{run_engine, ConfigError, Engine, Settings, SysfsTelemetry};
use chem_protocol::{AppMessage, BoardId};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::wiring::{simulated_settings, ChannelFactory};

#[derive(Parser, Debug)]
#[command(name = "chem-hostd", version, about = "Chemical sensor board host daemon")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/chem-hostd/config.json)
    #[arg(short, long, env = "CHEM_HOSTD_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Run every bus against simulated boards
    #[arg(long)]
    simulate: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Write the simulated configuration to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Bus for --raw commands (default: the first configured bus)
    #[arg(long, value_name = "NAME")]
    raw_bus: Option<String>,

    /// Send raw commands as BOARD:PAYLOAD (e.g. 3:T), print the answers and exit
    #[arg(long, value_name = "BOARD:PAYLOAD", num_args = 1..)]
    raw: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chem_hostd=info,chem_protocol=info,chem_bus=info,chem_engine=info,chem_sim=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.list_ports {
        return list_ports();
    }
    if cli.init_config {
        return init_config(cli.config.as_deref());
    }

    let settings = load_settings(&cli)?;
    tracing::info!(
        "Starting chem-hostd with {} bus(es){}",
        settings.buses.len(),
        if cli.simulate { " (simulated)" } else { "" }
    );

    let mut factory = ChannelFactory::new(cli.simulate);
    let engine = Arc::new(Engine::from_settings(
        &settings,
        Arc::new(SysfsTelemetry::new()),
        |bus| factory.channel_for(bus),
    ));

    let connected = engine.connect_all().await;
    if connected == 0 {
        tracing::warn!("No bus connected yet; retrying on first write");
    }

    let result = if cli.raw.is_empty() {
        run(engine.clone(), cli.json).await
    } else {
        send_raw(&engine, cli.raw_bus.as_deref(), &cli.raw).await
    };

    engine.disconnect_all().await;
    factory.shutdown();
    result
}

async fn run(engine: Arc<Engine>, json: bool) -> Result<()> {
    let (event_tx, mut events) = mpsc::channel(1024);
    let handle = run_engine(engine.clone(), event_tx);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => report::report(&engine, &event, json),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn send_raw(engine: &Engine, bus: Option<&str>, raw: &[String]) -> Result<()> {
    let bus = match bus {
        Some(bus) => bus.to_string(),
        None => match engine.hosts().first() {
            Some(entry) => entry.host.name().to_string(),
            None => bail!("No bus configured"),
        },
    };
    let commands = raw
        .iter()
        .map(|arg| parse_raw(arg))
        .collect::<Result<Vec<_>>>()?;

    let answers = engine
        .send_raw(&bus, &commands)
        .await
        .with_context(|| format!("Raw commands on {} failed", bus))?;
    for answer in &answers {
        println!("{}", answer);
    }
    if answers.len() < commands.len() {
        bail!(
            "{} of {} commands answered",
            answers.len(),
            commands.len()
        );
    }
    Ok(())
}

/// `BOARD:PAYLOAD` with a decimal board id
fn parse_raw(arg: &str) -> Result<AppMessage> {
    let (board, payload) = arg
        .split_once(':')
        .with_context(|| format!("Expected BOARD:PAYLOAD, got {:?}", arg))?;
    let board: u8 = board
        .parse()
        .with_context(|| format!("Invalid board id {:?}", board))?;
    let board = BoardId::addressable(board)?;
    if payload.is_empty() {
        bail!("Empty payload in {:?}", arg);
    }
    Ok(AppMessage::new(board, payload))
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    match Settings::load(cli.config.as_deref()) {
        Ok(settings) if cli.simulate && settings.buses.is_empty() => Ok(simulated_settings()),
        Ok(settings) => Ok(settings),
        Err(ConfigError::Io { source, .. })
            if cli.simulate && source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(simulated_settings())
        }
        Err(ConfigError::NoConfigDir) if cli.simulate => Ok(simulated_settings()),
        Err(e) => Err(e).context("Failed to load configuration"),
    }
}

fn init_config(path: Option<&std::path::Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Settings::default_path().context("No configuration directory")?,
    };
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    simulated_settings().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = PortScanner::new().enumerate_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.describe());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw() {
        let message = parse_raw("3:T").unwrap();
        assert_eq!(message.board_id(), BoardId::new(3));
        assert_eq!(message.payload(), "T");

        assert!(parse_raw("T").is_err());
        assert!(parse_raw("16:T").is_err());
        assert!(parse_raw("x:T").is_err());
        assert!(parse_raw("2:").is_err());
    }

    #[test]
    fn test_cli_parses_raw_list() {
        let cli = Cli::parse_from(["chem-hostd", "--simulate", "--raw", "1:T", "3:V"]);
        assert!(cli.simulate);
        assert_eq!(cli.raw, vec!["1:T", "3:V"]);
        assert!(cli.raw_bus.is_none());
    }
}
