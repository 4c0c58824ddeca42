//! Error types for the integration-supervisor crate.
//!
//! This module defines a unified error enumeration used across definition
//! construction, protocol parsing, and runner/group/manager orchestration.
//! It integrates with `thiserror` to provide rich `Display` implementations
//! and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants cover parse/validation, I/O, protocol, and feature-flag errors.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the integration-supervisor library.
pub enum SupervisorError {
    /// A definition failed to sanitize (conflicting exec/name fields, bad interval, ...).
    #[error("invalid integration definition `{0}`: {1}")]
    InvalidDefinition(String, String),

    /// A stdout line could not be classified as any recognized protocol shape.
    #[error("malformed protocol line: {0}")]
    ProtocolParse(String),

    /// The command-request envelope parsed but carried an unsupported version.
    #[error("unsupported command_request_version: {0}")]
    UnsupportedCommandVersion(String),

    /// Discovery source failed to produce matches for a pass.
    #[error("discovery fetch failed: {0}")]
    DiscoveryFailed(String),

    /// The executor failed to launch a child process.
    #[error("launch failed for `{0}`: {1}")]
    LaunchFailed(String, String),

    /// A config-load error (loader collaborator), causing the file to be skipped.
    #[error("failed to load config `{0}`: {1}")]
    LoadFailed(String, String),

    /// Feature-flag resolution could not find an owning config file.
    #[error("cannot find cfg file for feature `{0}`")]
    FeatureNotFound(String),

    /// The telemetry emitter rejected a payload.
    #[error("emit failed: {0}")]
    EmitFailed(String),

    /// I/O error from the filesystem watcher, embedded-config materialization, etc.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error surfaced from the protocol layer.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
