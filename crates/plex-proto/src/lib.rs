//! Plex "now playing" core: session polling, player remote control and the
//! shared state the presentation layer reads.

pub mod artwork;
pub mod command;
pub mod config;
pub mod error;
pub mod platform;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod state;
