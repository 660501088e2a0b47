//! Command-line tool for Baader-protocol domes.
//!
//! Subcommands:
//! - `status`: Print azimuth, calibration state, shutter and flap
//! - `goto` / `move` / `park` / `home`: Issue a move and wait for arrival
//! - `calibrate`: Run the calibration procedure
//! - `shutter` / `flap`: Open or close and wait until done
//! - `run`: Poll continuously and take commands from stdin
//! - `config`: Print or write the effective configuration
//!
//! Pass `--sim` to any subcommand to drive the simulated dome instead of the
//! serial port.

use std::io::{self, BufRead};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dome::channel::SerialChannel;
use dome::{
    ActuatorKind, ActuatorTarget, ByteChannel, CalibrationRequest, CommandOutcome, ConfigStore,
    Direction, DomeConfig, DomeController, DomeResult, DomeStatus, Poller, Request,
    SimulatedDome, TickReport,
};
use tracing::info;

type AnyDome = DomeController<Box<dyn ByteChannel>>;

/// Baader Dome Control Tool
#[derive(Parser, Debug)]
#[command(name = "dome_tool")]
#[command(about = "Control tool for Baader-protocol observatory domes")]
#[command(version)]
struct Args {
    /// Drive the simulated dome instead of the serial port
    #[arg(long, global = true)]
    sim: bool,

    /// Serial port of the dome controller (overrides config)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Config file (default: ~/.cf_config/dome.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Poll period in milliseconds (overrides config)
    #[arg(long, global = true)]
    poll_ms: Option<u64>,

    /// Log protocol frames
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print current dome state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Goto an absolute azimuth
    Goto {
        /// Target azimuth in degrees
        #[arg(long)]
        az: f64,

        /// Seconds to wait for arrival
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Move relative to the current azimuth
    Move {
        /// Degrees to move
        #[arg(long)]
        delta: f64,

        /// Move counter-clockwise
        #[arg(long)]
        ccw: bool,

        /// Seconds to wait for arrival
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Move to the park position
    Park {
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Move to the home position
    Home {
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Run the calibration procedure
    Calibrate {
        /// Seconds to wait for completion
        #[arg(long, default_value = "900")]
        timeout: u64,
    },

    /// Open or close the shutter
    Shutter {
        action: Action,

        #[arg(long, default_value = "180")]
        timeout: u64,
    },

    /// Open or close the flap
    Flap {
        action: Action,

        #[arg(long, default_value = "180")]
        timeout: u64,
    },

    /// Poll continuously and read commands from stdin
    Run,

    /// Print the effective configuration
    Config {
        /// Save it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Action {
    Open,
    Close,
}

impl From<Action> for ActuatorTarget {
    fn from(action: Action) -> Self {
        match action {
            Action::Open => ActuatorTarget::Open,
            Action::Close => ActuatorTarget::Close,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = load_config(&args)?;

    if let Command::Config { write } = args.command {
        return cmd_config(&args, &config, write);
    }

    let mut dome = connect(&args, config)?;

    match args.command {
        Command::Status { json } => cmd_status(&dome, json),
        Command::Goto { az, timeout } => {
            let result = dome.move_to(az);
            cmd_motion(&mut dome, result, "goto", timeout)
        }
        Command::Move {
            delta,
            ccw,
            timeout,
        } => {
            let direction = if ccw {
                Direction::CounterClockwise
            } else {
                Direction::Clockwise
            };
            let result = dome.move_by(direction, delta);
            cmd_motion(&mut dome, result, "move", timeout)
        }
        Command::Park { timeout } => {
            let result = dome.park();
            cmd_motion(&mut dome, result, "park", timeout)
        }
        Command::Home { timeout } => {
            let result = dome.home();
            cmd_motion(&mut dome, result, "home", timeout)
        }
        Command::Calibrate { timeout } => cmd_calibrate(&mut dome, timeout),
        Command::Shutter { action, timeout } => {
            cmd_actuator(&mut dome, ActuatorKind::Shutter, action.into(), timeout)
        }
        Command::Flap { action, timeout } => {
            cmd_actuator(&mut dome, ActuatorKind::Flap, action.into(), timeout)
        }
        Command::Run => cmd_run(&mut dome),
        Command::Config { .. } => Ok(()),
    }
}

// ==================== Setup ====================

fn load_config(args: &Args) -> Result<DomeConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigStore::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => match ConfigStore::new().ok().and_then(|store| store.load()) {
            Some(loaded) => loaded.context("Failed to load ~/.cf_config/dome.json")?,
            None => DomeConfig::default(),
        },
    };

    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(poll_ms) = args.poll_ms {
        config.poll_interval_ms = poll_ms;
    }
    config.validate()?;
    Ok(config)
}

fn connect(args: &Args, config: DomeConfig) -> Result<AnyDome> {
    let channel: Box<dyn ByteChannel> = if args.sim {
        info!("Using simulated dome");
        Box::new(SimulatedDome::new(config.simulation.clone()))
    } else {
        Box::new(SerialChannel::open(
            &config.port,
            config.baud_rate,
            config.command_timeout(),
        )?)
    };
    Ok(DomeController::connect(config, channel)?)
}

/// Poll until `done` or bail after `timeout_secs`.
fn wait_for<F>(dome: &mut AnyDome, timeout_secs: u64, what: &str, done: F) -> Result<()>
where
    F: FnMut(&AnyDome, &TickReport) -> bool,
{
    let mut poller = Poller::new(dome.config().poll_interval());
    if poller.run_until(dome, Duration::from_secs(timeout_secs), done) {
        Ok(())
    } else {
        bail!("Timed out after {timeout_secs}s waiting for {what}")
    }
}

fn check(outcome: CommandOutcome, what: &str) -> Result<()> {
    match outcome {
        CommandOutcome::Accepted => Ok(()),
        CommandOutcome::Rejected => bail!("{what} was rejected by the dome controller"),
        CommandOutcome::Error(e) => Err(e).with_context(|| format!("{what} failed")),
    }
}

fn print_status(dome: &AnyDome) {
    let target = if dome.motion().is_busy() {
        format!(" (moving to {:.1}°)", dome.target_azimuth())
    } else {
        String::new()
    };
    println!("Azimuth:     {:.1}°{target}", dome.azimuth());
    println!(
        "Status:      {} (calibration {})",
        dome.status(),
        dome.calibration_stage()
    );
    println!("Synced:      {}", dome.is_synced());
    if dome.is_position_faulted() {
        println!("Position:    last reply not understood");
    }
    println!("Shutter:     {}", dome.shutter().describe());
    println!("Flap:        {}", dome.flap().describe());
}

// ==================== Commands ====================

fn cmd_status(dome: &AnyDome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&dome.snapshot())?);
    } else {
        print_status(dome);
    }
    Ok(())
}

fn cmd_motion(
    dome: &mut AnyDome,
    result: DomeResult<CommandOutcome>,
    what: &str,
    timeout: u64,
) -> Result<()> {
    check(result?, what)?;
    println!("{what}: moving to {:.1}°...", dome.target_azimuth());
    wait_for(dome, timeout, "arrival", |d, _| !d.motion().is_busy())?;
    print_status(dome);
    Ok(())
}

fn cmd_calibrate(dome: &mut AnyDome, timeout: u64) -> Result<()> {
    match dome.start_calibration()? {
        CalibrationRequest::AlreadyCalibrated => {
            println!("Dome is already calibrated.");
            return Ok(());
        }
        CalibrationRequest::Aborted => {
            println!("Calibration aborted.");
            return Ok(());
        }
        CalibrationRequest::Started { target } => {
            println!("Calibrating, stage 1 target {target:.1}°...");
        }
    }

    wait_for(dome, timeout, "calibration", |d, _| {
        d.status() != DomeStatus::Calibrating
    })?;
    if dome.status() != DomeStatus::Ready {
        bail!("Calibration did not complete");
    }
    print_status(dome);
    Ok(())
}

fn cmd_actuator(
    dome: &mut AnyDome,
    kind: ActuatorKind,
    target: ActuatorTarget,
    timeout: u64,
) -> Result<()> {
    let outcome = match kind {
        ActuatorKind::Shutter => dome.control_shutter(target),
        ActuatorKind::Flap => dome.control_flap(target),
    };
    check(outcome, &format!("{kind} {target}"))?;

    wait_for(dome, timeout, &kind.to_string(), |d, _| {
        let actuator = match kind {
            ActuatorKind::Shutter => d.shutter(),
            ActuatorKind::Flap => d.flap(),
        };
        actuator.state() == target.terminal_state() || actuator.is_faulted()
    })?;

    let actuator = match kind {
        ActuatorKind::Shutter => dome.shutter(),
        ActuatorKind::Flap => dome.flap(),
    };
    if actuator.is_faulted() {
        bail!("{}", actuator.describe());
    }
    println!("{}", actuator.describe());
    Ok(())
}

fn cmd_run(dome: &mut AnyDome) -> Result<()> {
    println!("Dome REPL - enter commands, 'quit' to exit");
    println!("Examples: goto 90, move -15, shutter open, flap close, calibrate, status");
    println!();

    let (tx, rx) = crossbeam_channel::unbounded::<Request>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Request>() {
                Ok(request) => {
                    if tx.send(request).is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("Error: {e}"),
            }
        }
    });

    let mut poller = Poller::new(dome.config().poll_interval());
    poller.serve(dome, &rx, |d, request| {
        println!("{}", request.apply(d));
        if request == Request::Quit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    Ok(())
}

fn cmd_config(args: &Args, config: &DomeConfig, write: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if write {
        let path = match &args.config {
            Some(path) => {
                std::fs::write(path, serde_json::to_string_pretty(config)?)?;
                path.clone()
            }
            None => ConfigStore::new()?.save(config)?,
        };
        println!("Saved to {}", path.display());
    }
    Ok(())
}
