//! # peptalk-monitor: Engine Control-Link Monitor
//!
//! Console tool that keeps a PepTalk link to one graphics engine open,
//! reports what is on air and lets an operator send commands.
//!
//! ## Commands
//!
//! - plain line: sent as a request, the engine's reply is printed
//! - `:onair`: table of on-air records
//! - `:playing <id>` / `:find <show> [playlist]`: on-air queries
//! - `:quit`: disconnect and exit

pub mod config;
pub mod monitor;
