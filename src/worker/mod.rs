//! Worker module for draining the stage queue
//!
//! This module provides:
//! - StageRunner: Main worker loop that polls stage messages and runs stages
//! - WorkerConfig: Configuration for the worker

pub mod config;
pub mod task_runner;

pub use config::WorkerConfig;
pub use task_runner::{setup_signal_handler, StageRunner};
