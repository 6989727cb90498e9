//! Turnstile - Distributed Admission Control
//!
//! This crate decides, per caller, whether a request may proceed. Admission
//! state lives in a shared sorted-set store (Redis) so every service instance
//! sees the same budgets. Sliding-window checks are serialized per caller by a
//! distributed lock, and every store call is guarded by a circuit breaker.
//! Any doubt about shared state denies the request.

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
