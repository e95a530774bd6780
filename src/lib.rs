//! Fulcrum is an HTTP load balancer.
//!
//! It spreads incoming HTTP requests across a pool of backend servers
//! using a configurable selection strategy, keeps the pool's health
//! current with a background probe loop, and pins clients to a backend
//! with a sticky cookie when session affinity is enabled.
//!
//! # Architecture
//!
//! - [`registry`] -- The backend set and its health flags; the single
//!   source of truth shared by the dispatcher and the health checker.
//! - [`balancer`] -- Random, round-robin, and weighted selection over the
//!   healthy snapshot.
//! - [`affinity`] -- Sticky-cookie lookup and `Set-Cookie` issuance.
//! - [`health`] -- Background probe loop and the `GET /health` endpoint.
//! - [`proxy`] -- The dispatcher (select, forward, count, demote) and
//!   header construction.
//! - [`transport`] -- Hyper-based forwarding and probing behind the
//!   [`Transport`](transport::Transport) and [`Prober`](transport::Prober)
//!   traits.
//! - [`metrics`] -- Atomic request counters and the `GET /metrics` report.
//! - [`config`] -- Configuration model, validation, and file sources.
//! - [`cli`] / [`cmd`] -- Command-line parsing and subcommands (run, init,
//!   validate, status).
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`server`] -- Shared application state, router, and graceful shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod affinity;
pub mod balancer;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod transport;
