//! Audio host and device management
//!
//! Owns the selected backend, the selected input/output endpoints, and the
//! negotiated stream parameters. Everything here runs on the control thread;
//! the render side only ever sees the parameters baked into a stream build.

use std::collections::HashMap;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{HostId, SupportedBufferSize, SupportedStreamConfigRange};
use serde::{Deserialize, Serialize};

use super::error::EngineError;

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

// Engine-side bounds applied before any device capability is consulted
const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 384000;
const MIN_BUFFER_SIZE: u32 = 16;
const MAX_BUFFER_SIZE: u32 = 4096;

/// Everything the audio-stack thread needs to open a stream pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamParams {
    pub host: String,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

/// Inclusive value interval extracted from a device capability range
type Interval = (u32, u32);

/// Selected host/devices plus the negotiated stream config.
///
/// Device name lists are cached per host at construction: some drivers
/// (ASIO in particular) stop enumerating sibling devices once one has been
/// opened, so later queries fall back to what was visible at startup.
pub struct DeviceManager {
    host_id: HostId,
    input_name: Option<String>,
    output_name: Option<String>,
    sample_rate: u32,
    buffer_size: u32,
    cached_inputs: HashMap<String, Vec<String>>,
    cached_outputs: HashMap<String, Vec<String>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        let mut cached_inputs = HashMap::new();
        let mut cached_outputs = HashMap::new();

        for id in cpal::available_hosts() {
            let Ok(host) = cpal::host_from_id(id) else {
                log::warn!("Skipping unopenable host {:?}", id.name());
                continue;
            };
            cached_inputs.insert(id.name().to_string(), device_names(host.input_devices()));
            cached_outputs.insert(id.name().to_string(), device_names(host.output_devices()));
        }

        let host = cpal::default_host();
        let input_name = host.default_input_device().and_then(|d| d.name().ok());
        let output_name = host.default_output_device().and_then(|d| d.name().ok());

        log::info!(
            "Device manager ready: host {:?}, input {:?}, output {:?}",
            host.id().name(),
            input_name,
            output_name
        );

        Self {
            host_id: host.id(),
            input_name,
            output_name,
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            cached_inputs,
            cached_outputs,
        }
    }

    /// Ordered backend names available on this platform
    pub fn host_names(&self) -> Vec<String> {
        cpal::available_hosts()
            .iter()
            .map(|id| id.name().to_string())
            .collect()
    }

    pub fn current_host(&self) -> String {
        self.host_id.name().to_string()
    }

    pub fn current_input(&self) -> Option<String> {
        self.input_name.clone()
    }

    pub fn current_output(&self) -> Option<String> {
        self.output_name.clone()
    }

    /// Switch backends. On failure the previous host stays selected.
    pub fn select_host(&mut self, name: &str) -> Result<(), EngineError> {
        let id = cpal::available_hosts()
            .into_iter()
            .find(|id| id.name() == name)
            .ok_or(EngineError::HostUnavailable)?;
        let host = cpal::host_from_id(id).map_err(|e| {
            log::warn!("Failed to open host {}: {}", name, e);
            EngineError::HostUnavailable
        })?;

        // Refresh the cache while the host is freshly opened
        self.cached_inputs
            .insert(name.to_string(), device_names(host.input_devices()));
        self.cached_outputs
            .insert(name.to_string(), device_names(host.output_devices()));

        self.host_id = id;
        self.input_name = host.default_input_device().and_then(|d| d.name().ok());
        self.output_name = host.default_output_device().and_then(|d| d.name().ok());
        Ok(())
    }

    /// Input endpoints under the currently selected host only
    pub fn input_device_names(&self) -> Vec<String> {
        self.enumerate(true)
    }

    /// Output endpoints under the currently selected host only
    pub fn output_device_names(&self) -> Vec<String> {
        self.enumerate(false)
    }

    fn enumerate(&self, inputs: bool) -> Vec<String> {
        let fresh = cpal::host_from_id(self.host_id).ok().map(|host| {
            if inputs {
                device_names(host.input_devices())
            } else {
                device_names(host.output_devices())
            }
        });
        let cache = if inputs {
            &self.cached_inputs
        } else {
            &self.cached_outputs
        };
        match fresh {
            Some(names) if !names.is_empty() => names,
            _ => cache.get(self.host_id.name()).cloned().unwrap_or_default(),
        }
    }

    pub fn select_input(&mut self, name: &str) -> Result<(), EngineError> {
        if !self.input_device_names().iter().any(|n| n == name) {
            return Err(EngineError::NotFound);
        }
        self.input_name = Some(name.to_string());
        Ok(())
    }

    pub fn select_output(&mut self, name: &str) -> Result<(), EngineError> {
        if !self.output_device_names().iter().any(|n| n == name) {
            return Err(EngineError::NotFound);
        }
        self.output_name = Some(name.to_string());
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Request a sample rate. The nearest rate supported by both selected
    /// devices is applied; if that differs from the request the caller gets
    /// a `CapabilityMismatch` carrying what was actually applied.
    pub fn set_sample_rate(&mut self, requested: u32) -> Result<u32, EngineError> {
        let bounded = requested.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
        let output = self.capability_intervals(false, rate_intervals);
        let input = self.capability_intervals(true, rate_intervals);
        let applied =
            nearest_in_intersection(bounded, &output, &input).unwrap_or(self.sample_rate);
        self.sample_rate = applied;
        if applied == requested {
            Ok(applied)
        } else {
            Err(EngineError::CapabilityMismatch { substituted: applied })
        }
    }

    /// Request a buffer size; same substitution contract as sample rate.
    pub fn set_buffer_size(&mut self, requested: u32) -> Result<u32, EngineError> {
        let bounded = requested.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        let output = self.capability_intervals(false, buffer_intervals);
        let input = self.capability_intervals(true, buffer_intervals);
        let applied = nearest_in_intersection(bounded, &output, &input).unwrap_or(bounded);
        self.buffer_size = applied;
        if applied == requested {
            Ok(applied)
        } else {
            Err(EngineError::CapabilityMismatch { substituted: applied })
        }
    }

    /// Restore a persisted configuration; values still go through the
    /// substitution path, mismatches are not errors here.
    pub fn restore(&mut self, params: &StreamParams) {
        if self.select_host(&params.host).is_err() {
            log::warn!("Persisted host {:?} unavailable, keeping default", params.host);
        }
        if let Some(input) = &params.input_device {
            let _ = self.select_input(input);
        }
        if let Some(output) = &params.output_device {
            let _ = self.select_output(output);
        }
        let _ = self.set_sample_rate(params.sample_rate);
        let _ = self.set_buffer_size(params.buffer_size);
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            host: self.current_host(),
            input_device: self.input_name.clone(),
            output_device: self.output_name.clone(),
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
        }
    }

    /// Capability intervals of one selected device. Empty means
    /// unconstrained: a missing device cannot veto the other one.
    fn capability_intervals(
        &self,
        input: bool,
        extract: fn(&[SupportedStreamConfigRange]) -> Vec<Interval>,
    ) -> Vec<Interval> {
        let Some(name) = (if input { &self.input_name } else { &self.output_name }) else {
            return Vec::new();
        };
        let Ok(host) = cpal::host_from_id(self.host_id) else {
            return Vec::new();
        };
        let device = if input {
            host.input_devices()
                .ok()
                .and_then(|mut it| it.find(|d| d.name().map(|n| &n == name).unwrap_or(false)))
        } else {
            host.output_devices()
                .ok()
                .and_then(|mut it| it.find(|d| d.name().map(|n| &n == name).unwrap_or(false)))
        };
        let Some(device) = device else {
            return Vec::new();
        };
        let ranges: Vec<_> = if input {
            device
                .supported_input_configs()
                .map(|it| it.collect())
                .unwrap_or_default()
        } else {
            device
                .supported_output_configs()
                .map(|it| it.collect())
                .unwrap_or_default()
        };
        extract(&ranges)
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn device_names<I>(devices: Result<I, cpal::DevicesError>) -> Vec<String>
where
    I: Iterator<Item = cpal::Device>,
{
    match devices {
        Ok(it) => it.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            log::warn!("Device enumeration failed: {}", e);
            Vec::new()
        }
    }
}

/// Sample-rate intervals advertised by a device
pub fn rate_intervals(ranges: &[SupportedStreamConfigRange]) -> Vec<Interval> {
    ranges
        .iter()
        .map(|r| (r.min_sample_rate().0, r.max_sample_rate().0))
        .collect()
}

/// Buffer-size intervals advertised by a device; `Unknown` ranges impose no
/// constraint and are dropped
pub fn buffer_intervals(ranges: &[SupportedStreamConfigRange]) -> Vec<Interval> {
    ranges
        .iter()
        .filter_map(|r| match r.buffer_size() {
            SupportedBufferSize::Range { min, max } => Some((*min, *max)),
            SupportedBufferSize::Unknown => None,
        })
        .collect()
}

/// Nearest value to `requested` inside the intersection of two interval
/// sets. An empty set is unconstrained. `None` means the constrained sets
/// share no values; callers then keep their previous value.
pub fn nearest_in_intersection(requested: u32, a: &[Interval], b: &[Interval]) -> Option<u32> {
    let candidates: Vec<Interval> = match (a.is_empty(), b.is_empty()) {
        (true, true) => return Some(requested),
        (false, true) => a.to_vec(),
        (true, false) => b.to_vec(),
        (false, false) => {
            let mut out = Vec::new();
            for &(a_lo, a_hi) in a {
                for &(b_lo, b_hi) in b {
                    let lo = a_lo.max(b_lo);
                    let hi = a_hi.min(b_hi);
                    if lo <= hi {
                        out.push((lo, hi));
                    }
                }
            }
            out
        }
    };

    candidates
        .iter()
        .map(|&(lo, hi)| requested.clamp(lo, hi))
        .min_by_key(|&v| (v.abs_diff(requested), v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SampleRate};

    fn make_range(min_rate: u32, max_rate: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            2,
            SampleRate(min_rate),
            SampleRate(max_rate),
            SupportedBufferSize::Range { min: 32, max: 4096 },
            SampleFormat::F32,
        )
    }

    #[test]
    fn exact_value_inside_intersection_is_kept() {
        let a = vec![(44100, 96000)];
        let b = vec![(8000, 48000)];
        assert_eq!(nearest_in_intersection(48000, &a, &b), Some(48000));
    }

    #[test]
    fn out_of_range_value_snaps_to_nearest_edge() {
        let a = vec![(44100, 48000)];
        assert_eq!(nearest_in_intersection(192000, &a, &[]), Some(48000));
        assert_eq!(nearest_in_intersection(8000, &a, &[]), Some(44100));
    }

    #[test]
    fn nearest_respects_both_devices() {
        // Output goes up to 192k but input caps at 48k
        let output = vec![(44100, 192000)];
        let input = vec![(44100, 48000)];
        assert_eq!(nearest_in_intersection(96000, &output, &input), Some(48000));
    }

    #[test]
    fn disjoint_capabilities_yield_no_value() {
        let a = vec![(44100, 44100)];
        let b = vec![(48000, 48000)];
        assert_eq!(nearest_in_intersection(44100, &a, &b), None);
    }

    #[test]
    fn gap_between_intervals_prefers_closer_edge() {
        let a = vec![(22050, 22050), (96000, 96000)];
        assert_eq!(nearest_in_intersection(32000, &a, &[]), Some(22050));
        assert_eq!(nearest_in_intersection(64000, &a, &[]), Some(96000));
    }

    #[test]
    fn equidistant_candidates_pick_the_lower_value() {
        let a = vec![(100, 100), (300, 300)];
        assert_eq!(nearest_in_intersection(200, &a, &[]), Some(100));
    }

    #[test]
    fn intervals_extract_from_config_ranges() {
        let ranges = vec![make_range(44100, 48000), make_range(96000, 96000)];
        assert_eq!(rate_intervals(&ranges), vec![(44100, 48000), (96000, 96000)]);
        assert_eq!(buffer_intervals(&ranges), vec![(32, 4096), (32, 4096)]);
    }

    #[test]
    fn unknown_buffer_ranges_impose_no_constraint() {
        let range = SupportedStreamConfigRange::new(
            2,
            SampleRate(44100),
            SampleRate(44100),
            SupportedBufferSize::Unknown,
            SampleFormat::F32,
        );
        assert!(buffer_intervals(&[range]).is_empty());
        assert_eq!(nearest_in_intersection(256, &[], &[]), Some(256));
    }
}
