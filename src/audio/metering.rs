//! Render-path metering published through lock-free scalars
//!
//! The render callback is the only writer; the control thread only ever
//! reads. Values are f32 bit patterns in `AtomicU32` so neither side takes
//! a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// Exponential smoothing factor shared by the CPU and level meters
const SMOOTHING: f32 = 0.1;

#[inline]
fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

#[inline]
fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

/// Smoothed render-callback load plus output peak levels
pub struct Meter {
    cpu_load: AtomicU32,
    level_left: AtomicU32,
    level_right: AtomicU32,
}

impl Meter {
    pub fn new() -> Self {
        Self {
            cpu_load: AtomicU32::new(f32_to_u32(0.0)),
            level_left: AtomicU32::new(f32_to_u32(0.0)),
            level_right: AtomicU32::new(f32_to_u32(0.0)),
        }
    }

    /// Fold one callback's wall time into the smoothed load figure.
    ///
    /// `elapsed_secs` is time spent inside the callback, `period_secs` the
    /// nominal duration of the buffer it produced. Render thread only.
    #[inline]
    pub fn record_callback(&self, elapsed_secs: f32, period_secs: f32) {
        if period_secs <= 0.0 {
            return;
        }
        let instant = (elapsed_secs / period_secs * 100.0).clamp(0.0, 100.0);
        let current = u32_to_f32(self.cpu_load.load(Ordering::Relaxed));
        let smoothed = current * (1.0 - SMOOTHING) + instant * SMOOTHING;
        self.cpu_load.store(f32_to_u32(smoothed), Ordering::Relaxed);
    }

    /// Fold one callback's peak levels into the smoothed meters. Render
    /// thread only.
    #[inline]
    pub fn record_levels(&self, peak_left: f32, peak_right: f32) {
        for (cell, peak) in [(&self.level_left, peak_left), (&self.level_right, peak_right)] {
            let current = u32_to_f32(cell.load(Ordering::Relaxed));
            let smoothed = current * (1.0 - SMOOTHING) + peak * SMOOTHING;
            cell.store(f32_to_u32(smoothed), Ordering::Relaxed);
        }
    }

    /// Clear the meters, e.g. when the stream stops.
    pub fn reset(&self) {
        self.cpu_load.store(f32_to_u32(0.0), Ordering::Relaxed);
        self.level_left.store(f32_to_u32(0.0), Ordering::Relaxed);
        self.level_right.store(f32_to_u32(0.0), Ordering::Relaxed);
    }

    /// Smoothed render load as a percentage in [0, 100]
    pub fn cpu_usage(&self) -> f32 {
        u32_to_f32(self.cpu_load.load(Ordering::Relaxed)).clamp(0.0, 100.0)
    }

    /// Smoothed output peaks (left, right), linear 0.0 - 1.0
    pub fn output_levels(&self) -> (f32, f32) {
        (
            u32_to_f32(self.level_left.load(Ordering::Relaxed)),
            u32_to_f32(self.level_right.load(Ordering::Relaxed)),
        )
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_usage_stays_in_range() {
        let meter = Meter::new();
        // A callback that ran 10x longer than its period must still read <= 100
        for _ in 0..100 {
            meter.record_callback(0.1, 0.01);
        }
        assert!(meter.cpu_usage() <= 100.0);
        assert!(meter.cpu_usage() > 90.0);
    }

    #[test]
    fn load_increases_monotonically_with_heavier_callbacks() {
        let meter = Meter::new();
        let mut previous = meter.cpu_usage();
        for load in [0.001f32, 0.002, 0.004, 0.008] {
            for _ in 0..200 {
                meter.record_callback(load, 0.01);
            }
            let reading = meter.cpu_usage();
            assert!(reading > previous, "{} !> {}", reading, previous);
            previous = reading;
        }
    }

    #[test]
    fn reset_clears_meters() {
        let meter = Meter::new();
        meter.record_callback(0.005, 0.01);
        meter.record_levels(0.8, 0.6);
        meter.reset();
        assert_eq!(meter.cpu_usage(), 0.0);
        assert_eq!(meter.output_levels(), (0.0, 0.0));
    }
}
