//! # Meshgate - Polling Telemetry Gateway for Broadcast Radio Networks
//!
//! Meshgate coordinates a small wireless sensor network: one gateway node
//! and several endpoint (leaf) nodes sharing a broadcast-only, collision
//! prone radio medium. The gateway polls each leaf in turn, assembles the
//! replies into structured telemetry, property, and log messages, streams
//! them to an uplink host as newline-terminated JSON-style objects, and
//! relays host commands back down to individual leaves.
//!
//! ## Features
//!
//! - **Round-Robin Polling**: Token handshakes with deadline-based loss
//!   detection; an unresponsive device costs one deadline, never a stall.
//! - **Device Registry**: Stable small-integer ids assigned on first
//!   contact, idempotent re-registration, slot-preserving deactivation.
//! - **Incremental Message Assembly**: One ordered key→value builder per
//!   device per stream, flushed atomically on the `eom` terminator.
//! - **Compact Command Protocol**: `[addr,addr,...:]name(p1,p2,p3)` text
//!   RPCs with addressed fan-out and a forward-compatible catalog.
//! - **Two Roles, One Codebase**: `--role gateway` or `--role endpoint`,
//!   sharing the command parser, scalar types, and radio transport.
//! - **Async Design**: Built with Tokio; all protocol state lives behind a
//!   single event-loop consumer, so no locks are needed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshgate::config::Config;
//! use meshgate::gateway::GatewayServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load("config.toml").await?;
//!
//!     // Create and start the gateway
//!     let mut server = GatewayServer::new(config)?;
//!     server.connect_uplink().await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`gateway`] - Registry, scheduler, assembler, diagnostics, event loop
//! - [`endpoint`] - The leaf role
//! - [`command`] - Text RPC parsing, fan-out, and dispatch
//! - [`radio`] - Radio modem transport and line framing
//! - [`uplink`] - Line-oriented host channel
//! - [`sensors`] - Sensor/actuator collaborator traits and the simulated board
//! - [`config`] - Configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  GatewayServer  │ ← Orchestration and protocol state
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Radio Modem    │ ← Broadcast medium (half-duplex, paced writer)
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Uplink Host    │ ← Line-oriented telemetry out / commands in
//! └─────────────────┘
//! ```

pub mod command;
pub mod config;
pub mod endpoint;
pub mod gateway;
pub mod logutil;
pub mod metrics;
pub mod radio;
pub mod sensors;
pub mod uplink;
