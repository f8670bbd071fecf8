//! HTTP layer for the arbiter.
//!
//! Exposes service status and the manual lock/activate controls as a small
//! JSON API, plus health, metrics and a bundled status page.

pub mod handler;
