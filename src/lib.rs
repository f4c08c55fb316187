//! Incremental collection of releases and commits from tracked repositories.
//!
//! A [`collector::Collector`] asks each configured [`sources::SourceAdapter`]
//! for what changed since the stored watermark, drops noise through a
//! [`filters::FilterChain`], stores new changes idempotently in a
//! [`infra::Store`] and finally advances the watermark.

pub mod cli;
pub mod collector;
pub mod domain;
pub mod error;
pub mod filters;
pub mod infra;
pub mod logging;
pub mod sources;

pub use collector::{ChangeSink, Collector, RunReport};
pub use domain::{Change, ChangeKind};
pub use error::{CollectError, ConfigError, SourceError, StoreError};
