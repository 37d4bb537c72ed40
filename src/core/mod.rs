//! Core module - shared infrastructure for tenx
//!
//! This module contains the message model, run metadata, configuration,
//! error handling and tracing setup used throughout the crate.

pub mod config;
pub mod error;
pub mod metadata;
pub mod telemetry;
pub mod types;

pub use config::{AgentConfig, Config, LoggingConfig, ProviderConfig, ToolCallingMode};
pub use error::{Result, TenxError, ToolError};
pub use metadata::{Metadata, TokenUsage};
pub use types::*;
