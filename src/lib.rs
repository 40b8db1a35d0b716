//! Gatekeeper - HTTP Rate Limiting Service
//!
//! This crate gates incoming HTTP requests against abuse. It enforces
//! per-client, per-endpoint quotas over exact sliding windows, escalates
//! repeat offenders into temporary blocks, and emits the standard
//! `X-RateLimit-*` and `Retry-After` response headers.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
