//! Inspect GPIO chips and watch line events.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linebus::config::EventConfig;
use linebus::emitter::{GpioChangeEvent, GpioEventListener};
use linebus::gpio::{EventMode, GpioChip, PortConfig, PortMode};
use linebus::hw_trait::GpioPort;
use linebus::native::LinuxOps;
use serde_json::json;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tracing::info;

/// GPIO line inspector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print chip and line information
    Info {
        /// Chip device, e.g. /dev/gpiochip0
        chip: PathBuf,
    },

    /// Print edge events on lines until interrupted
    Watch {
        /// Chip device, e.g. /dev/gpiochip0
        chip: PathBuf,

        /// Line offsets to watch
        #[arg(required = true)]
        offsets: Vec<u32>,

        /// Edges to report (rising, falling, both)
        #[arg(short, long, default_value = "both")]
        edge: EventMode,

        /// Input bias (input, input_pullup, input_pulldown)
        #[arg(short, long, default_value = "input")]
        mode: PortMode,

        /// Debounce window in microseconds
        #[arg(short, long, default_value_t = 0)]
        debounce_us: u32,
    },
}

fn print_info(chip: &GpioChip) -> Result<()> {
    let info = chip.info();
    let mut lines = Vec::with_capacity(info.lines as usize);
    for offset in 0..info.lines {
        let line = chip
            .line_info(offset)
            .with_context(|| format!("Failed to read info for line {offset}"))?;
        lines.push(json!({
            "offset": line.offset,
            "name": line.name,
            "consumer": line.consumer,
            "used": line.is_used(),
            "flags": format!("{:?}", line.flags),
        }));
    }

    let report = json!({
        "path": chip.path().display().to_string(),
        "name": info.name,
        "label": info.label,
        "lines": lines,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn watch(chip: &GpioChip, config: PortConfig) -> Result<()> {
    if !config.mode.is_input() {
        anyhow::bail!("watching needs an input mode, not {}", config.mode);
    }
    let port = chip
        .request_port(config)
        .context("Failed to request lines")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<GpioChangeEvent>();
    let listener: Arc<dyn GpioEventListener> =
        Arc::new(move |event: &GpioChangeEvent| -> anyhow::Result<()> {
            tx.send(event.clone())
                .map_err(|_| anyhow::anyhow!("event receiver dropped"))
        });
    port.add_listener(Arc::clone(&listener))?;
    info!(port = %port.config().id(), "Watching, Ctrl-C to stop");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let line = json!({
                    "source": &*event.source,
                    "edge": event.event_type.to_string(),
                    "timestamp_ns": event.timestamp_ns,
                });
                println!("{line}");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT.");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
                break;
            }
        }
    }

    port.remove_listener(&listener)?;
    port.close()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    linebus::tracing::init_journald_or_stdout();
    let args = Args::parse();

    match args.command {
        Command::Info { chip } => {
            let chip = GpioChip::open(&chip)
                .with_context(|| format!("Failed to open {}", chip.display()))?;
            print_info(&chip)
        }
        Command::Watch {
            chip,
            offsets,
            edge,
            mode,
            debounce_us,
        } => {
            let events = EventConfig::from_env();
            info!(
                strategy = %events.debounce_strategy,
                poll_timeout = ?events.poll_timeout,
                "Event configuration"
            );
            let chip = GpioChip::open_with(&chip, LinuxOps::new()?, events)
                .with_context(|| format!("Failed to open {}", chip.display()))?;
            let config = PortConfig::new(offsets)
                .with_mode(mode)
                .with_event_mode(edge)
                .with_debounce_us(debounce_us)
                .with_id("linebus-watch");
            watch(&chip, config).await
        }
    }
}
