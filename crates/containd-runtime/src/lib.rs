//! Container lifecycle management for containd.
//!
//! A [`Client`](client::Client) owns the registry of live containers and
//! the collaborators the lifecycle core talks to: the host compute service
//! that runs processes inside isolated environments and the backend that
//! receives streams and state notifications. Each started container gets
//! one background monitor per process which classifies the exit, tears the
//! environment down, consults the restart manager, and emits exactly one
//! terminal notification.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod backend;
pub mod client;
pub mod container;
pub mod host;
pub mod iopipe;
pub mod registry;
pub mod restart;
pub mod state;

pub use backend::Backend;
pub use client::Client;
pub use container::{Container, CreateOption};
pub use host::ComputeService;
pub use iopipe::IoPipe;
pub use restart::{PolicyRestartManager, RestartDecision, RestartManager, RestartPolicy};
pub use state::{StateInfo, StateKind};
