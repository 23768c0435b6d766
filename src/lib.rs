//! PiBot Voice - Turn-taking voice engine for a small robot
//!
//! This library provides the listening side of the robot:
//! - Microphone capture and amplitude endpointing
//! - Recognition session lifecycle, including mid-stream restarts
//! - Wake phrase matching
//! - The wake → record → hand-off state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   TurnController                     │
//! │  WaitingForWake → Awake → RecordingCommand → Processing
//! └──────┬──────────────┬──────────────┬────────────────┘
//!        │ frames       │ results      │ prompts / commands
//! ┌──────▼──────┐ ┌─────▼──────────┐ ┌─▼──────────────────┐
//! │ AudioSource │ │ Recognition    │ │ PromptEmitter      │
//! │ Endpointer  │ │ Session        │ │ CommandHandler     │
//! └─────────────┘ └────────────────┘ └────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod handler;
pub mod turn;
pub mod voice;

pub use config::{Config, EngineConfig};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use turn::{
    Capabilities, CommandHandler, CommandRecorder, CycleOutcome, Recording, RecordingEnd,
    TurnController, TurnState, TurnTransition, VoiceCommand,
};
