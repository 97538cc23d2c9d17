//! Configuration Module
//!
//! Configuration loading for the acquisition engine.

mod settings;

pub use settings::{
    AcquisitionConfig, ApiKey, CacheSettings, ConfigError, ModeSettings, PersistenceSettings,
    ServerSettings, StreamSettings, UpstreamSettings,
};
