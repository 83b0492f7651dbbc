#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Control of a 17-servo robotic hand over a half-duplex serial bus
//! (hardware-agnostic).
//!
//! All bus access goes through `servohand_traits::Transport`; time goes
//! through `servohand_traits::Clock` so tests can run on a manual clock.
//!
//! ## Architecture
//!
//! - **Wire**: packet framing and checksums (`protocol`), retrying
//!   register access under one bus lock (`codec`), control table (`registers`)
//! - **Servos**: per-servo goals, feedback and limits (`actuator`)
//! - **Hand**: batch operations, calibration and monitoring (`manager`,
//!   built with `ActuatorManager::builder()`)
//! - **Motion**: recordings (`recording`), capture and replay (`recorder`,
//!   `playback`)
//! - **Configuration**: runtime config structs (`config`) and their
//!   mapping from TOML (`conversions`)

pub mod actuator;
pub mod atomic;
pub mod builder;
pub mod calibration;
pub mod codec;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod manager;
pub mod mocks;
pub mod monitor;
pub mod playback;
pub mod protocol;
pub mod recorder;
pub mod recording;
pub mod registers;
pub mod servo_map;
pub mod util;
pub mod worker;

pub use actuator::{Actuator, ActuatorState, Feedback, Limits};
pub use builder::ManagerBuilder;
pub use calibration::{CalibrationFile, CalibrationStore};
pub use codec::ProtocolCodec;
pub use config::{
    BatchDelays, BusTiming, FrameSettings, LimitPolicy, ManagerCfg, MotionProfile, PlaybackCfg,
    RecorderCfg, ServoCfg, TorquePolicy,
};
pub use error::{HandError, ProtocolError, Result};
pub use manager::{ActuatorManager, HandControl};
pub use monitor::{FeedbackSnapshot, MonitorObserver};
pub use recorder::MotionRecorder;
pub use recording::{Recording, RecordingFrame, RecordingMode, RecordingSummary};
pub use servo_map::ServoMap;
