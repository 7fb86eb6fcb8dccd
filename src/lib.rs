//! Turnstile - Distributed Admission Control for a Public Data API
//!
//! This crate decides, for every request reaching a public read-only API
//! gateway, whether the request may proceed. Callers are identified by API
//! key or client address, held to layered sliding-window quotas, and counted
//! in a shared store so that any number of stateless gateway processes
//! enforce the same limits.

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod ratelimit;
pub mod store;
