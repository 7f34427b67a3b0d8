//! Count-Min Sketch primitive (`SPEC_FULL.md` §4.1).
//!
//! Counters are per-cell `AtomicU64`, incremented with a CAS-based
//! saturating add. This is the documented concurrency choice for
//! `update`/`estimate`: a race between two concurrent updaters can only
//! inflate an estimate, never corrupt it, which `SPEC_FULL.md` §4.1 calls
//! out as acceptable for an anomaly signal.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PluginError;
use crate::hash::{row_seeds, seeded_hash64};

const ROW_SEED_BASE: u64 = 0x5151_C0DE_F00D_BEEF;

/// A fixed-shape `d` (rows) x `w` (columns) counter table.
pub struct Cms {
    d: usize,
    w: usize,
    seeds: Vec<u64>,
    table: Vec<AtomicU64>,
}

impl Cms {
    /// Build a sketch from an explicit shape.
    pub fn new_with_dw(d: usize, w: usize) -> Result<Self, PluginError> {
        if d == 0 || w == 0 {
            return Err(PluginError::ConfigInvalid(format!(
                "sketch shape must have d >= 1 and w >= 1, got d={d} w={w}"
            )));
        }
        let seeds = row_seeds(d, ROW_SEED_BASE);
        let table = (0..d * w).map(|_| AtomicU64::new(0)).collect();
        Ok(Self { d, w, seeds, table })
    }

    /// Build a sketch from error parameters: `d = ceil(ln(1/gamma))`,
    /// `w = ceil(e/eps)`.
    pub fn new_with_gamma_eps(gamma: f64, eps: f64) -> Result<Self, PluginError> {
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(PluginError::ConfigInvalid(format!(
                "gamma must be in (0, 1], got {gamma}"
            )));
        }
        if !(eps > 0.0 && eps <= 1.0) {
            return Err(PluginError::ConfigInvalid(format!(
                "eps must be in (0, 1], got {eps}"
            )));
        }
        let d = (1.0_f64 / gamma).ln().ceil().max(1.0) as usize;
        let w = (std::f64::consts::E / eps).ceil().max(1.0) as usize;
        Self::new_with_dw(d, w)
    }

    pub fn rows(&self) -> usize {
        self.d
    }

    pub fn cols(&self) -> usize {
        self.w
    }

    /// `d * w * 8` bytes, unchanged by updates.
    pub fn size_bytes(&self) -> usize {
        self.d * self.w * 8
    }

    fn index(&self, row: usize, key: &[u8]) -> usize {
        let col = (seeded_hash64(key, self.seeds[row]) as usize) % self.w;
        row * self.w + col
    }

    /// Saturating add across every row's bucket for `key`.
    pub fn update(&self, key: &[u8], delta: u64) {
        for row in 0..self.d {
            saturating_fetch_add(&self.table[self.index(row, key)], delta);
        }
    }

    /// Minimum counter across rows for `key`.
    pub fn estimate(&self, key: &[u8]) -> u64 {
        (0..self.d)
            .map(|row| self.table[self.index(row, key)].load(Ordering::Relaxed))
            .min()
            .unwrap_or(0)
    }

    /// Zero every counter. May race with concurrent `update`s, losing at
    /// most the in-flight increments (`SPEC_FULL.md` §4.2).
    pub fn reset(&self) {
        for cell in &self.table {
            cell.store(0, Ordering::Relaxed);
        }
    }
}

fn saturating_fetch_add(cell: &AtomicU64, delta: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let new = current.saturating_add(delta);
        match cell.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

/// Inverse of `d = ceil(ln(1/gamma))`.
pub fn gamma_from_d(d: usize) -> f64 {
    1.0 / (d as f64).exp()
}

/// Inverse of `w = ceil(e/eps)`.
pub fn eps_from_w(w: usize) -> f64 {
    std::f64::consts::E / (w as f64)
}
