pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod orchestration;
pub mod sockets;
pub mod tracker;
