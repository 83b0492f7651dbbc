//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "servohand", version, about = "Servo hand control CLI")]
pub struct Cli {
    /// Path to config TOML; defaults apply when the file does not exist
    #[arg(long, value_name = "FILE", default_value = "etc/servohand.toml")]
    pub config: PathBuf,

    /// Run against the in-memory simulated hand instead of a serial port
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "port")]
    pub sim: bool,

    /// Serial device (overrides serial.port from the config)
    #[arg(long, value_name = "DEVICE")]
    pub port: Option<String>,

    /// Print results and errors as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); falls back to
    /// logging.level, then "warn"
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TorqueArg {
    On,
    Off,
    /// Passive resistance without holding a position
    Damp,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Frame,
    Realtime,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe every servo id and report which ones answer
    Ping,
    /// Switch torque on, off, or into damping mode on all servos
    Torque {
        #[arg(value_enum)]
        state: TorqueArg,
    },
    /// Command goal positions
    Move {
        /// Target as ID=POSITION; repeat for several servos
        #[arg(long = "set", value_name = "ID=POS", required = true, value_parser = parse_target)]
        targets: Vec<(u8, i32)>,
        #[arg(long)]
        speed: Option<i32>,
        #[arg(long)]
        acceleration: Option<i32>,
        #[arg(long)]
        torque: Option<i32>,
    },
    /// Read present positions (or full feedback)
    Read {
        #[arg(long, action = ArgAction::SetTrue)]
        feedback: bool,
    },
    /// Release torque and record joint ranges while the hand is moved by hand
    Calibrate {
        /// Sampling duration in seconds
        #[arg(long, default_value_t = 10.0)]
        secs: f64,
    },
    /// Record motion to a JSON file
    Record {
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Realtime mode: stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        secs: Option<f64>,
        /// Output file (default: auto-named in recording.save_dir)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Play back a recording file
    Play {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Time scale for realtime recordings (0 < speed <= 5; 2.0 = twice as fast)
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
    /// Stream feedback snapshots
    Monitor {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        secs: Option<f64>,
        #[arg(long = "interval-ms")]
        interval_ms: Option<u64>,
    },
    /// List serial ports visible to the OS
    Ports,
}

/// Parse `ID=POSITION`.
pub fn parse_target(s: &str) -> Result<(u8, i32), String> {
    let (id, pos) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=POSITION, got '{s}'"))?;
    let id: u8 = id
        .trim()
        .parse()
        .map_err(|_| format!("invalid servo id '{id}'"))?;
    let pos: i32 = pos
        .trim()
        .parse()
        .map_err(|_| format!("invalid position '{pos}'"))?;
    Ok((id, pos))
}
