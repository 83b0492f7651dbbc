//! Subcommands: backend assembly and one function per command.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use eyre::{Result, WrapErr, eyre};
use serde_json::{Value, json};
use servohand_config::Config;
use servohand_core::monitor::ObserverError;
use servohand_core::{
    ActuatorManager, FeedbackSnapshot, HandError, ManagerCfg, MotionProfile, MotionRecorder,
    RecorderCfg, RecordingMode, ServoMap,
};
use servohand_traits::Transport;

use crate::cli::{Cli, Commands, ModeArg, TorqueArg};

type BoxedTransport = Box<dyn Transport + Send>;

pub fn run(cli: &Cli, cfg: &Config, shutdown: &Arc<AtomicBool>) -> Result<()> {
    if matches!(cli.cmd, Commands::Ports) {
        return ports(cli.json);
    }
    let manager = Arc::new(build_manager(cli, cfg)?);
    let online = manager.ping_all();

    match &cli.cmd {
        Commands::Ping => ping(cli.json, &online),
        Commands::Torque { state } => torque(cli.json, &manager, *state),
        Commands::Move {
            targets,
            speed,
            acceleration,
            torque,
        } => {
            let profile = MotionProfile {
                speed: *speed,
                acceleration: *acceleration,
                torque: *torque,
            };
            move_to(cli.json, &manager, targets, &profile)
        }
        Commands::Read { feedback } => read(cli.json, &manager, *feedback),
        Commands::Calibrate { secs } => calibrate(cli.json, &manager, *secs, shutdown),
        Commands::Record { mode, secs, out } => record(
            cli.json,
            manager,
            cfg,
            mode.map(|m| match m {
                ModeArg::Frame => RecordingMode::Frame,
                ModeArg::Realtime => RecordingMode::Realtime,
            }),
            *secs,
            out.as_deref(),
            shutdown,
        ),
        Commands::Play {
            file,
            repeat,
            speed,
        } => play(cli.json, manager, cfg, file, *repeat, *speed, shutdown),
        Commands::Monitor { secs, interval_ms } => {
            monitor(cli.json, &manager, *secs, *interval_ms, shutdown)
        }
        Commands::Ports => Ok(()),
    }
}

fn open_transport(cli: &Cli, cfg: &Config) -> Result<BoxedTransport> {
    if cli.sim {
        let (bus, _handle) = servohand_hardware::simulated_hand();
        tracing::info!("using simulated hand");
        return Ok(Box::new(bus));
    }
    let port = cli
        .port
        .clone()
        .or_else(|| cfg.serial.port.clone())
        .ok_or_else(|| eyre!("no serial port configured; pass --port, set serial.port, or use --sim"))?;
    open_serial(&port, cfg)
}

#[cfg(feature = "hardware")]
fn open_serial(port: &str, cfg: &Config) -> Result<BoxedTransport> {
    let link = servohand_hardware::SerialTransport::open(
        port,
        cfg.serial.baudrate,
        Duration::from_millis(cfg.serial.timeout_ms),
    )
    .wrap_err_with(|| format!("open serial port {port}"))?;
    Ok(Box::new(link))
}

#[cfg(not(feature = "hardware"))]
fn open_serial(port: &str, _cfg: &Config) -> Result<BoxedTransport> {
    Err(eyre!(
        "serial support not compiled in (cannot open {port}); rebuild with --features hardware or use --sim"
    ))
}

fn build_manager(cli: &Cli, cfg: &Config) -> Result<ActuatorManager> {
    let transport = open_transport(cli, cfg)?;
    ActuatorManager::builder()
        .with_config(ManagerCfg::from(cfg))
        .with_transport(transport)
        .build()
}

fn print_json(value: &Value) {
    println!("{value}");
}

fn ids(list: impl IntoIterator<Item = u8>) -> String {
    let parts: Vec<String> = list.into_iter().map(|id| id.to_string()).collect();
    parts.join(" ")
}

fn split_results(results: &ServoMap<bool>) -> (Vec<u8>, Vec<u8>) {
    let ok = results.iter().filter(|(_, ok)| **ok).map(|(id, _)| id).collect();
    let failed = results.iter().filter(|(_, ok)| !**ok).map(|(id, _)| id).collect();
    (ok, failed)
}

fn require_servos(manager: &ActuatorManager) -> Result<(), HandError> {
    if manager.connected_ids().is_empty() {
        return Err(HandError::Transport("no servo answered the ping".into()));
    }
    Ok(())
}

/// Seconds argument as a positive duration.
fn duration_arg(name: &str, secs: f64) -> Result<Duration, HandError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(HandError::Validation(format!("--{name} must be a positive number of seconds"))),
    }
}

/// Sleep until `limit` passes or Ctrl-C; true if interrupted.
fn wait_for(limit: Option<Duration>, shutdown: &AtomicBool) -> bool {
    let start = Instant::now();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        if limit.is_some_and(|l| start.elapsed() >= l) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn ports(json: bool) -> Result<()> {
    let names = list_ports()?;
    if json {
        print_json(&json!({ "ports": names }));
    } else if names.is_empty() {
        println!("no serial ports found");
    } else {
        for n in names {
            println!("{n}");
        }
    }
    Ok(())
}

#[cfg(feature = "hardware")]
fn list_ports() -> Result<Vec<String>> {
    Ok(servohand_hardware::SerialTransport::list_ports()?)
}

#[cfg(not(feature = "hardware"))]
fn list_ports() -> Result<Vec<String>> {
    Err(eyre!("serial support not compiled in; rebuild with --features hardware"))
}

fn ping(json: bool, online: &ServoMap<bool>) -> Result<()> {
    let (up, down) = split_results(online);
    if json {
        print_json(&json!({ "connected": up, "missing": down }));
    } else {
        println!("servos online: {}/{}", up.len(), online.len());
        println!("connected: {}", ids(up));
        if !down.is_empty() {
            println!("missing: {}", ids(down));
        }
    }
    Ok(())
}

fn torque(json: bool, manager: &ActuatorManager, state: TorqueArg) -> Result<()> {
    require_servos(manager)?;
    let (name, results) = match state {
        TorqueArg::On => ("on", manager.torque_on_all()),
        TorqueArg::Off => ("off", manager.torque_off_all()),
        TorqueArg::Damp => ("damp", manager.damping_all()),
    };
    let (ok, failed) = split_results(&results);
    if json {
        print_json(&json!({ "torque": name, "ok": ok, "failed": failed }));
    } else {
        println!("torque {name}: {} servos ok", ok.len());
        if !failed.is_empty() {
            println!("failed: {}", ids(failed.iter().copied()));
        }
    }
    if !failed.is_empty() {
        return Err(HandError::Transport(format!("torque {name} failed on servos {failed:?}")).into());
    }
    Ok(())
}

fn move_to(
    json: bool,
    manager: &ActuatorManager,
    targets: &[(u8, i32)],
    profile: &MotionProfile,
) -> Result<()> {
    require_servos(manager)?;
    let mut map = ServoMap::new();
    for &(id, pos) in targets {
        if !map.insert(id, pos) {
            return Err(HandError::UnknownServo(id).into());
        }
    }
    for id in map.ids() {
        if let Some(servo) = manager.get_servo(id)
            && servo.is_connected()
            && !servo.is_torque_enabled()
        {
            servo
                .torque_on()
                .wrap_err_with(|| format!("enable torque on servo {id}"))?;
        }
    }
    let results = manager.set_all_positions(&map, profile);
    let (ok, failed) = split_results(&results);
    if json {
        print_json(&json!({ "moved": ok, "failed": failed }));
    } else {
        for (id, pos) in map.iter() {
            let status = if results.get(id).copied().unwrap_or(false) { "ok" } else { "FAILED" };
            println!("servo {id:>2} -> {pos:>6}  {status}");
        }
    }
    if !failed.is_empty() {
        return Err(HandError::Transport(format!(
            "servos {failed:?} did not accept the command (disconnected or out of range)"
        ))
        .into());
    }
    Ok(())
}

fn read(json: bool, manager: &ActuatorManager, feedback: bool) -> Result<()> {
    require_servos(manager)?;
    if feedback {
        let snapshot = manager.read_all_feedback();
        if json {
            print_json(&serde_json::to_value(&snapshot)?);
        } else {
            print_feedback_table(&snapshot);
        }
        return Ok(());
    }
    let positions = manager.read_all_positions();
    if json {
        print_json(&serde_json::to_value(&positions)?);
    } else {
        for (id, pos) in positions.iter() {
            match pos {
                Some(p) => println!("servo {id:>2}: {p:>6}"),
                None => println!("servo {id:>2}:      -"),
            }
        }
    }
    Ok(())
}

fn opt(v: Option<f64>, precision: usize) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{x:.precision$}"))
}

fn print_feedback_table(snapshot: &FeedbackSnapshot) {
    println!(" id   position      deg      rpm   load%     V     C  torque");
    for (id, fb) in snapshot.iter() {
        let Some(fb) = fb else {
            println!("{id:>3}   (no reply)");
            continue;
        };
        println!(
            "{id:>3} {:>10} {:>8} {:>8} {:>7} {:>5} {:>5}  {}",
            fb.position.map_or_else(|| "-".to_string(), |p| p.to_string()),
            opt(fb.position_deg, 1),
            opt(fb.speed_rpm, 1),
            opt(fb.load_percent, 1),
            opt(fb.voltage, 1),
            opt(fb.temperature, 0),
            if fb.torque_enabled { "on" } else { "off" },
        );
    }
}

fn calibrate(
    json: bool,
    manager: &ActuatorManager,
    secs: f64,
    shutdown: &AtomicBool,
) -> Result<()> {
    let limit = duration_arg("secs", secs)?;
    require_servos(manager)?;
    manager.start_calibration()?;
    if !json {
        eprintln!(
            "Torque released. Move every joint through its full range ({:.1}s, Ctrl-C to finish early).",
            limit.as_secs_f64()
        );
    }
    let interrupted = wait_for(Some(limit), shutdown);
    let limits = manager.stop_calibration()?;
    let path = manager
        .calibration_store()
        .map(|s| s.path().display().to_string());
    if json {
        let entries: serde_json::Map<String, Value> = limits
            .iter()
            .map(|(id, l)| (id.to_string(), json!({ "min": l.min, "max": l.max })))
            .collect();
        print_json(&json!({ "limits": entries, "file": path, "interrupted": interrupted }));
    } else {
        for (id, l) in limits.iter() {
            println!("servo {id:>2}: [{:>6}, {:>6}]", l.min, l.max);
        }
        match path {
            Some(p) => println!("calibration saved to {p}"),
            None => println!("calibration applied (no calibration file configured)"),
        }
    }
    Ok(())
}

fn record(
    json: bool,
    manager: Arc<ActuatorManager>,
    cfg: &Config,
    mode: Option<RecordingMode>,
    secs: Option<f64>,
    out: Option<&Path>,
    shutdown: &AtomicBool,
) -> Result<()> {
    require_servos(&manager)?;
    let limit = secs.map(|s| duration_arg("secs", s)).transpose()?;
    let recorder = MotionRecorder::for_manager(manager, RecorderCfg::from(cfg));
    recorder.start_recording(mode)?;

    match recorder.mode() {
        RecordingMode::Frame => {
            if !json {
                eprintln!("Press Enter to capture a frame, q then Enter to finish.");
            }
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = line.wrap_err("reading stdin")?;
                if line.trim().eq_ignore_ascii_case("q") || shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match recorder.add_frame() {
                    Ok(n) if !json => eprintln!("frame {n} captured"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "frame not captured"),
                }
            }
        }
        RecordingMode::Realtime => {
            if !json {
                eprintln!("Recording... (Ctrl-C to stop)");
            }
            wait_for(limit, shutdown);
        }
    }

    let frames = recorder.stop_recording();
    let path = recorder.save_recording(out)?;
    if json {
        print_json(&json!({
            "file": path.display().to_string(),
            "mode": recorder.mode().as_str(),
            "frames": frames,
        }));
    } else {
        println!("{frames} frames saved to {}", path.display());
    }
    Ok(())
}

fn play(
    json: bool,
    manager: Arc<ActuatorManager>,
    cfg: &Config,
    file: &Path,
    repeat: u32,
    speed: f64,
    shutdown: &AtomicBool,
) -> Result<()> {
    require_servos(&manager)?;
    let recorder = MotionRecorder::for_manager(manager, RecorderCfg::from(cfg));
    let summary = recorder.select_file(file)?;
    recorder.start_playback(repeat, speed, None)?;
    if !json {
        eprintln!(
            "Playing {} ({} frames, {:.1}s, {} mode) x{repeat} at {speed}x speed",
            file.display(),
            summary.frame_count,
            summary.duration,
            summary.mode
        );
    }
    let mut stopped = false;
    while !recorder.wait_playback(Duration::from_millis(100)) {
        if shutdown.load(Ordering::Relaxed) {
            stopped = recorder.stop_playback();
            break;
        }
    }
    if json {
        print_json(&json!({
            "file": file.display().to_string(),
            "frames": summary.frame_count,
            "repeats": repeat,
            "speed": speed,
            "stopped": stopped,
        }));
    } else if stopped {
        println!("playback stopped");
    } else {
        println!("playback complete");
    }
    Ok(())
}

fn monitor(
    json: bool,
    manager: &ActuatorManager,
    secs: Option<f64>,
    interval_ms: Option<u64>,
    shutdown: &AtomicBool,
) -> Result<()> {
    require_servos(manager)?;
    let limit = secs.map(|s| duration_arg("secs", s)).transpose()?;
    let interval = match interval_ms {
        Some(0) => {
            return Err(HandError::Validation("--interval-ms must be >= 1".into()).into());
        }
        other => other.map(Duration::from_millis),
    };
    manager.add_monitor_observer(
        move |snapshot: &FeedbackSnapshot| -> Result<(), ObserverError> {
            if json {
                println!("{}", serde_json::to_string(snapshot)?);
            } else {
                let line: Vec<String> = snapshot
                    .iter()
                    .map(|(id, fb)| match fb.as_ref().and_then(|f| f.position) {
                        Some(p) => format!("{id}:{p}"),
                        None => format!("{id}:-"),
                    })
                    .collect();
                println!("{}", line.join(" "));
            }
            Ok(())
        },
    );
    manager.start_monitoring(interval)?;
    wait_for(limit, shutdown);
    manager.stop_monitoring();
    Ok(())
}
