//! Plugin instance tying the bank, the host thread table, and the
//! error/duration bookkeeping together (`SPEC_FULL.md` §4.7, §9).
//!
//! Everything the host touches hangs off one `Plugin` value passed to
//! every entry point, per §9's "model as an explicitly owned plugin
//! instance; avoid ambient singletons."

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::bank::SketchBank;
use crate::buffer::RawEvent;
use crate::config::parse_config;
use crate::error::{LastError, PluginError};
use crate::fingerprint::extract;
use crate::host::ThreadTable;

pub struct Plugin {
    bank: SketchBank,
    table: Arc<dyn ThreadTable>,
    last_error: LastError,
    enabled: AtomicBool,
    start_time: RwLock<Option<SystemTime>>,
}

impl Plugin {
    pub fn new(table: Arc<dyn ThreadTable>) -> Self {
        Self {
            bank: SketchBank::new(),
            table,
            last_error: LastError::new(),
            enabled: AtomicBool::new(false),
            start_time: RwLock::new(None),
        }
    }

    /// Parse and validate `raw_config`, then build the sketch bank.
    /// Returns `false` on any `ConfigInvalid`/`TableBindingFailure`,
    /// recording the reason in [`Plugin::last_error`] (§7). Safe to call
    /// more than once for hot reload (§8 scenario 6).
    pub async fn init(&self, raw_config: &str) -> bool {
        match self.try_init(raw_config).await {
            Ok(()) => true,
            Err(e) => {
                self.last_error.set(&e);
                false
            }
        }
    }

    async fn try_init(&self, raw_config: &str) -> Result<(), PluginError> {
        let cfg = parse_config(raw_config)?;
        let validated = cfg.validate()?;
        let enabled = validated.enabled;

        self.bank.reconfigure(validated.into_sketch_entries()).await;
        self.enabled.store(enabled, Ordering::SeqCst);

        let mut start_time = self.start_time.write().await;
        if start_time.is_none() {
            *start_time = Some(read_start_ctime()?);
        }
        Ok(())
    }

    /// Feed one event through the dispatch loop. Returns `false` only
    /// when the event's own parameters were malformed (§4.6).
    pub async fn parse(&self, evt: &RawEvent<'_>) -> bool {
        match crate::dispatch::parse(evt, self.table.as_ref(), &self.bank).await {
            Ok(()) => true,
            Err(e) => {
                self.last_error.set(&e);
                false
            }
        }
    }

    /// `anomaly.count_min_sketch[i]` (§4.7).
    pub async fn extract_estimate(&self, i: usize, evt: &RawEvent<'_>) -> Result<u64, PluginError> {
        let entry = self.checked_entry(i).await?;
        let fp = extract(evt, self.table.as_ref(), &entry.tokens);
        Ok(entry.cms.estimate(fp.as_bytes()))
    }

    /// `anomaly.count_min_sketch.profile[i]` (§4.7).
    pub async fn extract_profile_string(&self, i: usize, evt: &RawEvent<'_>) -> Result<String, PluginError> {
        let entry = self.checked_entry(i).await?;
        Ok(extract(evt, self.table.as_ref(), &entry.tokens))
    }

    async fn checked_entry(&self, i: usize) -> Result<Arc<crate::bank::SketchEntry>, PluginError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(PluginError::ExtractOutOfBounds("count-min sketch is disabled".into()));
        }
        self.bank.get(i).await
    }

    /// `anomaly.falco.duration_ns` (§4.7): wall-clock nanoseconds since
    /// the host process's `/proc/self/cmdline` ctime, captured once at
    /// the first successful `init`.
    pub async fn duration_ns(&self) -> u64 {
        match *self.start_time.read().await {
            Some(start) => SystemTime::now().duration_since(start).unwrap_or_default().as_nanos() as u64,
            None => 0,
        }
    }

    pub fn last_error(&self) -> String {
        self.last_error.get()
    }

    pub async fn shutdown(&self) {
        self.bank.shutdown().await;
        self.enabled.store(false, Ordering::SeqCst);
    }
}

fn read_start_ctime() -> Result<SystemTime, PluginError> {
    let st = nix::sys::stat::stat("/proc/self/cmdline")
        .map_err(|e| PluginError::TableBindingFailure(format!("failed to stat /proc/self/cmdline: {e}")))?;
    Ok(UNIX_EPOCH + Duration::new(st.st_ctime as u64, st.st_ctime_nsec as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::event_codes::*;
    use crate::testutil::{thread, MockThreadTable};

    fn packed(params: &[&[u8]]) -> (Vec<u16>, Vec<u8>) {
        (params.iter().map(|p| p.len() as u16).collect(), params.concat())
    }

    fn cfg_json() -> &'static str {
        r#"{
            "count_min_sketch": {
                "enabled": true,
                "n_sketches": 1,
                "rows_cols": [[5, 2048]],
                "behavior_profiles": [
                    {"fields": "%proc.exe", "event_codes": [9]}
                ]
            }
        }"#
    }

    #[tokio::test]
    async fn basic_count_scenario() {
        let table = Arc::new(MockThreadTable::new());
        let mut t = thread(1, "sh");
        t.exe = "/bin/sh".to_string();
        table.insert_thread(t);
        let plugin = Plugin::new(table);
        assert!(plugin.init(cfg_json()).await, "{}", plugin.last_error());

        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 1, &lens, &payload);
        for _ in 0..1000 {
            assert!(plugin.parse(&evt).await);
        }

        assert_eq!(plugin.extract_estimate(0, &evt).await.unwrap(), 1000);
        assert_eq!(plugin.extract_profile_string(0, &evt).await.unwrap(), "/bin/sh");
    }

    #[tokio::test]
    async fn out_of_bounds_index_errors() {
        let table = Arc::new(MockThreadTable::new());
        let plugin = Plugin::new(table);
        assert!(plugin.init(cfg_json()).await);

        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 1, &lens, &payload);
        assert!(matches!(plugin.extract_estimate(5, &evt).await, Err(PluginError::ExtractOutOfBounds(_))));
    }

    #[tokio::test]
    async fn disabled_plugin_rejects_extraction() {
        let table = Arc::new(MockThreadTable::new());
        let plugin = Plugin::new(table);
        assert!(plugin.init(r#"{"count_min_sketch": {"enabled": false}}"#).await);

        let (lens, payload) = packed(&[]);
        let evt = RawEvent::new(EXECVE, 1, &lens, &payload);
        assert!(matches!(plugin.extract_estimate(0, &evt).await, Err(PluginError::ExtractOutOfBounds(_))));
    }

    #[tokio::test]
    async fn invalid_config_fails_init_and_records_last_error() {
        let table = Arc::new(MockThreadTable::new());
        let plugin = Plugin::new(table);
        assert!(!plugin.init("{not json").await);
        assert!(plugin.last_error().contains("invalid config JSON") || plugin.last_error().contains("invalid configuration"));
    }

    #[tokio::test]
    async fn hot_reload_preserves_start_time_and_swaps_sketches() {
        let table = Arc::new(MockThreadTable::new());
        let plugin = Plugin::new(table);
        assert!(plugin.init(cfg_json()).await);
        let first_duration = plugin.duration_ns().await;

        assert!(plugin.init(cfg_json()).await);
        let second_duration = plugin.duration_ns().await;
        assert!(second_duration >= first_duration);
    }
}
