//! Human-readable error descriptions and structured JSON error formatting.

use servohand_core::HandError;
use servohand_core::error::BuildError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransport => {
                "What happened: No bus transport was provided to the hand.\nLikely causes: The serial port or simulator was not wired into the builder.\nHow to fix: Pass --port <DEVICE> or --sim.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(he) = err.downcast_ref::<HandError>() {
        return match he {
            HandError::Transport(msg) => format!(
                "What happened: The servo bus did not answer ({msg}).\nLikely causes: Wrong port, bus not powered, wrong baudrate, or servos unplugged.\nHow to fix: Check power and wiring, verify serial.baudrate, and run `servohand ping`."
            ),
            HandError::Protocol(pe) => format!(
                "What happened: Corrupted or unexpected reply on the bus ({pe}).\nLikely causes: Electrical noise, two servos sharing an id, or a baudrate mismatch.\nHow to fix: Check cabling and termination; raise bus.retries or bus.read_timeout_ms."
            ),
            HandError::Validation(msg) => format!(
                "What happened: A value was rejected ({msg}).\nLikely causes: Target outside the calibrated range or an argument out of bounds.\nHow to fix: Adjust the value, recalibrate, or set policy.limits = \"clamp\"."
            ),
            HandError::State(msg) => format!(
                "What happened: The command is not allowed right now ({msg}).\nLikely causes: Another recording, playback, or calibration is active.\nHow to fix: Stop the running activity first."
            ),
            HandError::UnknownServo(id) => format!(
                "What happened: Servo id {id} does not exist.\nLikely causes: Typo in the id.\nHow to fix: Use ids 1 to 17."
            ),
            HandError::Io(msg) | HandError::Format(msg) => format!(
                "What happened: A file could not be read or written ({msg}).\nLikely causes: Missing directory, permissions, or a malformed JSON file.\nHow to fix: Check the path and file contents."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("no serial port configured") || lower.contains("serial support not compiled") {
        return format!(
            "What happened: No usable serial port ({msg}).\nLikely causes: --port missing or the binary was built without serial support.\nHow to fix: Pass --port <DEVICE> (build with --features hardware) or use --sim."
        );
    }

    if lower.contains("open serial port") {
        let cause = err
            .chain()
            .nth(1)
            .map(|c| format!(" Cause: {c}"))
            .unwrap_or_default();
        return format!(
            "What happened: Failed to open the serial port.{cause}\nLikely causes: Wrong device path, adapter unplugged, or missing permissions (dialout group).\nHow to fix: Run `servohand ports` to list devices and check permissions."
        );
    }

    if lower.contains("parsing config") || lower.contains("reading config") {
        return format!(
            "What happened: The configuration file could not be loaded.\nLikely causes: TOML syntax error or unknown value.\nHow to fix: Fix the file and try again. Details: {msg}"
        );
    }

    if lower.contains("invalid configuration") {
        let cause = err
            .chain()
            .nth(1)
            .map(|c| c.to_string())
            .unwrap_or_default();
        return format!(
            "What happened: Configuration is invalid ({cause}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.chain().nth(1) {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransport => "MissingTransport",
            BuildError::InvalidConfig(_) => "InvalidConfig",
        };
    }
    match err.downcast_ref::<HandError>() {
        Some(HandError::Transport(_)) => "Transport",
        Some(HandError::Protocol(_)) => "Protocol",
        Some(HandError::Validation(_)) => "Validation",
        Some(HandError::State(_)) => "State",
        Some(HandError::UnknownServo(_)) => "UnknownServo",
        Some(HandError::Io(_)) => "Io",
        Some(HandError::Format(_)) => "Format",
        None => "Error",
    }
}

/// Stable exit codes: 3 state, 4 validation/config, 5 bus failures, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(BuildError::InvalidConfig(_)) = err.downcast_ref::<BuildError>() {
        return 4;
    }
    match err.downcast_ref::<HandError>() {
        Some(HandError::State(_)) => 3,
        Some(HandError::Validation(_) | HandError::UnknownServo(_)) => 4,
        Some(HandError::Transport(_) | HandError::Protocol(_)) => 5,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    json!({ "reason": reason_name(err), "message": humanize(err) }).to_string()
}
