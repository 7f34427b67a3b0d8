//! Typed error taxonomy for the plugin's public API.
//!
//! Internal plumbing (config file reads, JSON parsing) uses `anyhow` and is
//! converted to [`PluginError`] only at the boundary the host actually sees,
//! mirroring how the reference daemon layers `anyhow::Result` under a typed
//! surface for anything user-facing.

use std::sync::RwLock;

use thiserror::Error;

/// The five error kinds a host integration can observe.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Schema violation, array-length mismatch, or an `%fd.*` selector used
    /// with event codes outside the fd-producing set. Aborts init.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The host's thread-table schema does not expose a field the plugin
    /// needs. Aborts init.
    #[error("thread table binding failed: {0}")]
    TableBindingFailure(String),

    /// A sketch index was out of bounds, or CMS is disabled.
    #[error("extract out of bounds: {0}")]
    ExtractOutOfBounds(String),

    /// A single field selector could not be resolved. Non-fatal; the
    /// offending selector contributes an empty string and this variant is
    /// only surfaced to callers who explicitly ask for diagnostics.
    #[error("extract field missing: {0}")]
    ExtractFieldMissing(String),

    /// The event's core parameters could not be decoded. Non-fatal for the
    /// plugin as a whole; the offending event's parse is aborted.
    #[error("parse buffer malformed: {0}")]
    ParseBufferMalformed(String),
}

/// Holds the most recent error message, mirroring the host's last-error
/// channel convention (`§9`: "model as an explicitly owned plugin instance").
#[derive(Default)]
pub struct LastError(RwLock<String>);

impl LastError {
    pub fn new() -> Self {
        Self(RwLock::new(String::new()))
    }

    pub fn set(&self, err: &PluginError) {
        if let Ok(mut slot) = self.0.write() {
            *slot = err.to_string();
        }
    }

    pub fn get(&self) -> String {
        self.0.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.0.write() {
            slot.clear();
        }
    }
}
