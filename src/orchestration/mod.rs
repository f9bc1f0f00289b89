//! Command orchestration built on the tracker.
//!
//! Provides [`stop_all::stop_all_commands`] for bulk shutdown and
//! [`debug::spawn_with_debug_socket`] for launching a process and locating the
//! debug socket it creates.

pub mod debug;
pub mod stop_all;

pub use debug::{
    DebugLaunch, SOCKET_DIR_VAR, SOCKET_PREFIX_VAR, advertise_registry, spawn_with_debug_socket,
};
pub use stop_all::{StopAllReport, stop_all_commands};
