//! Sketch bank: an ordered set of CMS instances, each paired with a
//! parsed profile and a reset scheduler (`SPEC_FULL.md` §4.2).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use crate::cms::Cms;
use crate::error::PluginError;
use crate::profile::Token;

/// Reset periods at or below this are coerced to "never reset" (§4.2, §5).
const MIN_RESET_PERIOD_MS: u64 = 100;

/// One sketch plus the profile it was configured with.
pub struct SketchEntry {
    pub cms: Arc<Cms>,
    pub tokens: Vec<Token>,
    pub event_codes: HashSet<i32>,
    pub reset_period_ms: u64,
}

/// Coerce a configured reset period per the §4.2 rule.
pub fn coerce_reset_period(period_ms: u64) -> u64 {
    if period_ms <= MIN_RESET_PERIOD_MS {
        0
    } else {
        period_ms
    }
}

impl SketchEntry {
    pub fn new(cms: Cms, tokens: Vec<Token>, event_codes: HashSet<i32>, reset_period_ms: u64) -> Self {
        Self {
            cms: Arc::new(cms),
            tokens,
            event_codes,
            reset_period_ms: coerce_reset_period(reset_period_ms),
        }
    }
}

/// Owns the live sketches and their reset workers. Shared across the
/// parse path, the extract path, and the workers themselves.
pub struct SketchBank {
    entries: RwLock<Vec<Arc<SketchEntry>>>,
    shutdown: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SketchBank {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Bounds-checked handle to the sketch at index `i`.
    pub async fn get(&self, i: usize) -> Result<Arc<SketchEntry>, PluginError> {
        self.entries
            .read()
            .await
            .get(i)
            .cloned()
            .ok_or_else(|| PluginError::ExtractOutOfBounds(format!("sketch index {i} out of bounds")))
    }

    pub async fn snapshot(&self) -> Vec<Arc<SketchEntry>> {
        self.entries.read().await.clone()
    }

    /// Tear down existing sketches and workers, then install `new_entries`.
    /// Drains prior workers before spawning new ones (§8 scenario 6).
    pub async fn reconfigure(&self, new_entries: Vec<SketchEntry>) {
        self.clear_all().await;
        self.shutting_down.store(false, Ordering::SeqCst);

        let mut new_workers = Vec::new();
        let mut built_entries = Vec::new();
        for entry in new_entries {
            let entry = Arc::new(entry);
            if entry.reset_period_ms > 0 {
                new_workers.push(spawn_reset_worker(entry.clone(), self.shutdown.clone(), self.shutting_down.clone()));
            }
            built_entries.push(entry);
        }

        *self.workers.lock().expect("bank worker lock poisoned") = new_workers;
        let count = built_entries.len();
        *self.entries.write().await = built_entries;
        info!("sketch bank reconfigured with {count} sketches");
    }

    /// Stop all reset workers and drop all sketches.
    pub async fn clear_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("bank worker lock poisoned");
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.entries.write().await.clear();
    }

    pub async fn shutdown(&self) {
        self.clear_all().await;
    }
}

impl Default for SketchBank {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_reset_worker(
    entry: Arc<SketchEntry>,
    shutdown: Arc<Notify>,
    stopped: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let period = Duration::from_millis(entry.reset_period_ms);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    entry.cms.reset();
                    debug!("reset sketch ({} rows x {} cols)", entry.cms.rows(), entry.cms.cols());
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
            if stopped.load(Ordering::SeqCst) {
                break;
            }
        }
    })
}
