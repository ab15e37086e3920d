//! # Simjector — a stand-alone command/telemetry simulator
//!
//! Simjector exercises an external autonomous executive by replaying a
//! scripted set of command responses and telemetry values against a real
//! wall clock. A script declares, per command name, what to return on the
//! 1st, 2nd, ... invocation (with an optional default for everything else),
//! and, separately, what telemetry values to publish and when, relative to
//! the simulator's own start time. Incoming "lookup-now" queries are
//! answered from the most recently published telemetry value.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use simjector::sim::{Scheduler, ScriptReader};
//! use std::sync::Arc;
//!
//! # struct NullRelay;
//! # #[async_trait::async_trait]
//! # impl simjector::sim::CommRelay for NullRelay {
//! #     async fn send_response(&self, _msg: simjector::sim::ResponseMessage) {}
//! # }
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut reader = ScriptReader::new();
//!     let script = std::io::BufReader::new(std::fs::File::open("scripts/demo.sim")?);
//!     reader.read_script(script, "scripts/demo.sim", false).await?;
//!     let (managers, agenda) = reader.into_parts();
//!
//!     let scheduler = Scheduler::new(managers, agenda, Arc::new(NullRelay));
//!     scheduler.start().await?;
//!     // ... drive scheduler.schedule_command_response / answer_lookup_now
//!     // from the transport until shutdown ...
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module organization
//!
//! - [`sim`] — the Scheduling & Response Core: `sim::value`, `sim::response`,
//!   `sim::manager`, `sim::agenda`, `sim::scheduler`, `sim::script`.
//! - [`relay`] — a reference `CommRelay` over a line-oriented TCP connection;
//!   not part of the core's contract, just a runnable demonstration of it.
//! - [`config`] — the hosting process's own configuration (script
//!   directory, agent name, central host:port), unrelated to `sim`'s inputs.
//! - [`logutil`] — single-line log escaping for script-sourced strings.

pub mod config;
pub mod logutil;
pub mod relay;
pub mod sim;
