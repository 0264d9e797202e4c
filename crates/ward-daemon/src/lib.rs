//! Ward Daemon - Always-on background service for the app guard
//!
//! This crate provides:
//! - Daemon configuration and guard construction
//! - A platform adapter that forwards overlay requests to UI clients
//! - The guard service (serialized access plus the session sweeper)
//! - IPC server for the observer and the challenge UI

pub mod config;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod service;

pub use config::{DaemonConfig, LockoutPreset};
pub use error::{DaemonError, Result};
pub use ipc::{IpcClient, IpcRequest, IpcResponse, IpcServer};
pub use platform::{ChannelPlatform, UiCommand, UiBiometric};
pub use service::GuardService;
