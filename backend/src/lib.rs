//! Runtime-defined metric tables with additive upserts, monthly roll-ups and
//! a cache layer.
//!
//! Operators declare schemas at runtime; each schema owns a physical
//! PostgreSQL table keyed by sub-unit and date. Writes merge into existing
//! rows, monthly summary tables are kept close to the raw rows and can be
//! rebuilt at any time, and statistics are served through a cache that every
//! mutation invalidates.
//!
//! Start from [`engine::PostgresEngine::connect`], or wire
//! [`engine::Engine::new`] over your own adapters.

pub mod config;
pub mod domain;
pub mod engine;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use engine::{Engine, EngineError, PostgresEngine};
