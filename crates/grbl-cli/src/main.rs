//! `grbl` command-line client.
//!
//! Connects to a Grbl controller whose serial port is exposed over TCP (for
//! example by `ser2net` or a network serial bridge), waits for the boot
//! sequence, runs one operation and prints the result.
//!
//! ```text
//! grbl --addr 192.168.1.50:23 status
//! grbl --addr 192.168.1.50:23 --json settings
//! grbl --addr 192.168.1.50:23 move --x -100 --y -100
//! ```
//!
//! Note that most controllers reset when the port is opened, so the banner is
//! sent on connect. Bridges that keep the port open need the controller reset
//! (Ctrl-X) before the boot sequence can be observed.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use grbl_client::{Client, ClientConfig, Event};
use grbl_protocol::{Catalog, Position};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "grbl",
    version,
    about = "Talk to a Grbl controller over a TCP serial bridge",
    disable_help_subcommand = true
)]
struct Cli {
    /// Address of the TCP serial bridge.
    #[arg(long, default_value = "127.0.0.1:23")]
    addr: String,

    /// YAML catalog overlaying the built-in Grbl 1.1 error and setting tables.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Connection name used in log messages.
    #[arg(long, default_value = "grbl")]
    name: String,

    /// Print decoded results as JSON.
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print a decoded status report.
    Status,
    /// Print all settings with their descriptions.
    Settings,
    /// Print the help line.
    Help,
    /// Run the homing cycle.
    Home,
    /// Clear the alarm lock.
    Unlock,
    /// Send a raw command line.
    Send {
        /// Command text, e.g. "G1 X10 F500".
        text: String,
    },
    /// Move to a position (only the given axes are sent).
    Move {
        #[arg(long, allow_hyphen_values = true)]
        x: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        y: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        z: Option<f64>,
    },
    /// Print every event until the connection closes.
    Monitor,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_catalog(path: Option<&PathBuf>) -> anyhow::Result<Catalog> {
    let catalog = Catalog::grbl_v1_1();
    match path {
        Some(path) => {
            let overlay = Catalog::load(path)
                .with_context(|| format!("loading catalog {}", path.display()))?;
            Ok(catalog.merge(overlay))
        }
        None => Ok(catalog),
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

async fn monitor(client: &Client) -> anyhow::Result<()> {
    let mut events = client
        .subscribe()
        .context("client has no broadcast publisher")?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(Event::Version(version)) => println!("# Grbl {}", version),
                Ok(Event::Command(text)) => println!("> {}", text),
                Ok(Event::Message(line)) => println!("< {}", line),
                Err(RecvError::Lagged(n)) => eprintln!("# {} events dropped", n),
                Err(RecvError::Closed) => return Ok(()),
            },
            reason = client.closed() => {
                info!("Connection closed: {}", reason);
                return Ok(());
            }
        }
    }
}

async fn run(client: &Client, action: Action, json: bool) -> anyhow::Result<()> {
    match action {
        Action::Status => {
            let status = client.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("state: {}", status.state);
                if let Some(p) = status.machine_position {
                    println!("machine position: X{:.3} Y{:.3} Z{:.3}", p.x, p.y, p.z);
                }
                if let Some(o) = status.work_coordinate_offset {
                    println!("work offset: X{:.3} Y{:.3} Z{:.3}", o.x, o.y, o.z);
                }
                if let Some(fs) = status.feed_and_speed {
                    println!("feed: {} spindle: {}", fs.feed_rate, fs.spindle);
                }
                if let Some(pins) = &status.pin_state {
                    println!("pins: {}", pins);
                }
            }
        }
        Action::Settings => {
            let settings = client.settings().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                for setting in settings {
                    println!(
                        "${}={} {} ({})",
                        setting.code,
                        setting.value,
                        setting.units.unwrap_or_default(),
                        setting.name.unwrap_or_default()
                    );
                }
            }
        }
        Action::Help => println!("{}", client.help().await?),
        Action::Home => print_lines(&client.run_homing_cycle().await?),
        Action::Unlock => print_lines(&client.kill_alarm_lock().await?),
        Action::Send { text } => print_lines(&client.command(&text).await?),
        Action::Move { x, y, z } => print_lines(&client.position(Position { x, y, z }).await?),
        Action::Monitor => monitor(client).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let catalog = load_catalog(cli.catalog.as_ref())?;
    let config = ClientConfig::named(cli.name.clone());

    info!("Connecting to {}", cli.addr);
    let client = Client::connect_tcp(cli.addr.as_str(), catalog, config)
        .await
        .with_context(|| format!("connecting to {}", cli.addr))?;

    if let Action::Monitor = cli.action {
        return monitor(&client).await;
    }

    client.ready().await.context("waiting for boot sequence")?;
    info!("Connected to Grbl {}", client.version().unwrap_or("?"));

    run(&client, cli.action, cli.json).await?;

    client.shutdown();
    Ok(())
}
