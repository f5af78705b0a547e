//! `panelgrep` crate (library surface).
//!
//! The primary entrypoint is the `panelgrep` binary (catalog server +
//! credential server CLI). This library exposes the HTTP surface, the
//! guardrails, and configuration so integration tests and embedders can
//! assemble the same stack.

#![recursion_limit = "512"]

pub mod config;
pub mod http;
pub mod limiter;
pub mod middleware;
pub mod rpc;
