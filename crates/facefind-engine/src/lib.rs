//! facefind-engine — Enrollment and identification on top of the store.
//!
//! The embedding provider runs on its own thread behind an [`EngineHandle`];
//! [`FacefindService`] combines that handle with the SQLite store and the
//! face image directory.

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::{BootstrapCache, BootstrapFace};
pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use service::{Enrollment, FacefindService, MatchReport};
