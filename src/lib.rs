//! Count-Min-Sketch behavior fingerprinting core for a syscall
//! anomaly-detection plugin.
//!
//! A host streams captured syscall events and owns a process/thread
//! state table; this crate turns each event into a configurable
//! "behavior fingerprint" string and maintains probabilistic frequency
//! estimates of those fingerprints via one or more Count-Min Sketches,
//! so a downstream rules engine can flag rare or unusual behavior.
//!
//! The host drives three entry points on [`Plugin`]: [`Plugin::init`],
//! [`Plugin::parse`], and the `extract_*` methods. Everything the host
//! needs to supply — the thread/fd subtables, the raw event buffer — is
//! modeled as a narrow collaborator trait ([`host::ThreadTable`]) rather
//! than a concrete FFI type, so the core is fully unit-testable without
//! a running host process.

pub mod bank;
pub mod buffer;
pub mod cms;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod host;
pub mod plugin;
pub mod profile;

#[cfg(test)]
mod testutil;

pub use bank::{SketchBank, SketchEntry};
pub use buffer::RawEvent;
pub use cms::Cms;
pub use config::{parse_config, CountMinSketchConfig, RootConfig, ValidatedConfig};
pub use error::PluginError;
pub use host::{FdSnapshot, ThreadSnapshot, ThreadTable};
pub use plugin::Plugin;
pub use profile::{FieldId, Selector, Token};
