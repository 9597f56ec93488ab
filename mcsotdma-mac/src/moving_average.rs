//! A fixed-window moving average over per-slot samples.

use alloc::vec;
use alloc::vec::Vec;

/// Circular buffer of the last `window` samples. Components feed one sample
/// per slot; `tick_close_slot` closes the slot and clears the updated flag so
/// a caller can substitute a default sample for slots without one.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    values: Vec<f64>,
    next: usize,
    len: usize,
    sum: f64,
    updated_this_slot: bool,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        debug_assert!(window > 0);
        MovingAverage { values: vec![0.0; window], next: 0, len: 0, sum: 0.0, updated_this_slot: false }
    }

    pub fn put(&mut self, value: f64) {
        if self.len == self.values.len() {
            self.sum -= self.values[self.next];
        } else {
            self.len += 1;
        }
        self.sum += value;
        self.values[self.next] = value;
        self.next = (self.next + 1) % self.values.len();
        self.updated_this_slot = true;
    }

    pub fn get(&self) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            self.sum / self.len as f64
        }
    }

    /// Whether a full window of samples has been collected.
    pub fn has_filled_window(&self) -> bool {
        self.len == self.values.len()
    }

    pub fn updated_this_slot(&self) -> bool {
        self.updated_this_slot
    }

    pub fn tick_close_slot(&mut self) {
        self.updated_this_slot = false;
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.next = 0;
        self.sum = 0.0;
        self.updated_this_slot = false;
    }
}
