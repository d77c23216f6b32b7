//! Guardrail - client-side rate limiting and expiring caching
//!
//! This crate provides two independent, best-effort safety nets: a
//! fixed-window rate limiter with optional cooldown blocking, and a
//! key-value cache with per-entry expiration layered over a
//! capacity-constrained textual store. Neither surfaces errors from its hot
//! path; failures degrade to a denial or a cache miss.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod ratelimit;
