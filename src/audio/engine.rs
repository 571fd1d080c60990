//! Engine state machine and the real-time render loop
//!
//! Control operations run on whatever thread Tauri calls them from; all
//! cpal handles live on a dedicated audio-stack thread (streams are not
//! `Send`), driven by a command channel. A `Stop` reply is only sent after
//! the streams are dropped, which is the acknowledgment that no further
//! render callback will run on the old configuration.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Mutex, RwLock};
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;

use super::chain::{render_pass, ChainSnapshot};
use super::device::{DeviceManager, StreamParams, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};
use super::error::EngineError;
use super::metering::Meter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => EngineState::Starting,
            2 => EngineState::Running,
            3 => EngineState::Stopping,
            _ => EngineState::Stopped,
        }
    }
}

/// State visible to both execution contexts. The render side reads the
/// chain through the swap and writes only the meter and the generation
/// counter; everything else is control-side.
pub struct EngineShared {
    state: AtomicU8,
    pub chain: ArcSwap<ChainSnapshot>,
    /// Bumped once per render callback; lets the control side observe that
    /// the render thread moved past a publication point
    generation: AtomicU64,
    pub meter: Meter,
    sample_rate: AtomicU32,
    buffer_size: AtomicU32,
}

impl EngineShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Stopped as u8),
            chain: ArcSwap::from_pointee(ChainSnapshot::empty()),
            generation: AtomicU64::new(0),
            meter: Meter::new(),
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
            buffer_size: AtomicU32::new(DEFAULT_BUFFER_SIZE),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Block until the render thread has completed a callback that started
    /// after now, or the stream stopped. Used before destroying anything an
    /// already-published snapshot might still reference.
    pub fn await_render_quiescent(&self) {
        if !self.is_running() {
            return;
        }
        let observed = self.generation();
        for _ in 0..500 {
            if !self.is_running() || self.generation() >= observed + 2 {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        log::warn!("Render thread did not advance, proceeding after timeout");
    }
}

impl Default for EngineShared {
    fn default() -> Self {
        Self::new()
    }
}

enum StreamCommand {
    Start {
        params: StreamParams,
        reply: SyncSender<Result<(), EngineError>>,
    },
    Stop {
        reply: SyncSender<()>,
    },
    Shutdown,
}

/// Control-side engine object. Owns device selection and sequences the
/// audio-stack thread; safe to share behind Tauri managed state.
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    devices: RwLock<DeviceManager>,
    control: Mutex<mpsc::Sender<StreamCommand>>,
}

impl AudioEngine {
    pub fn new(shared: Arc<EngineShared>) -> Self {
        let (tx, rx) = mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("audio-stack".to_string())
            .spawn(move || audio_stack_thread(thread_shared, rx))
            .expect("failed to spawn audio-stack thread");

        let engine = Self {
            shared,
            devices: RwLock::new(DeviceManager::new()),
            control: Mutex::new(tx),
        };
        engine.sync_shared_config();
        engine
    }

    pub fn shared(&self) -> Arc<EngineShared> {
        Arc::clone(&self.shared)
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    // ------------------------------------------------------------------
    // Device surface
    // ------------------------------------------------------------------

    pub fn list_hosts(&self) -> Vec<String> {
        self.devices.read().host_names()
    }

    pub fn current_host(&self) -> String {
        self.devices.read().current_host()
    }

    pub fn current_input(&self) -> Option<String> {
        self.devices.read().current_input()
    }

    pub fn current_output(&self) -> Option<String> {
        self.devices.read().current_output()
    }

    pub fn list_input_devices(&self) -> Vec<String> {
        self.devices.read().input_device_names()
    }

    pub fn list_output_devices(&self) -> Vec<String> {
        self.devices.read().output_device_names()
    }

    /// Stop any running stream and switch backends; a previously running
    /// engine comes back up on the new host. A failed open leaves the
    /// previous host selected (and restarts it if it was running).
    pub fn select_host(&self, name: &str) -> Result<(), EngineError> {
        let was_running = self.shared.is_running();
        self.stop();
        match self.devices.write().select_host(name) {
            Ok(()) => {
                self.sync_shared_config();
                if was_running {
                    self.start()
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                if was_running {
                    let _ = self.start();
                }
                Err(e)
            }
        }
    }

    /// Select the capture endpoint. Does not itself start a stopped
    /// stream; a running one passes through the full restart cycle.
    pub fn select_input(&self, name: &str) -> Result<(), EngineError> {
        self.select_device(name, true)
    }

    /// Select the playback endpoint; same start semantics as
    /// `select_input`.
    pub fn select_output(&self, name: &str) -> Result<(), EngineError> {
        self.select_device(name, false)
    }

    fn select_device(&self, name: &str, input: bool) -> Result<(), EngineError> {
        let was_running = self.shared.is_running();
        if was_running {
            self.stop();
        }
        let selected = {
            let mut devices = self.devices.write();
            if input {
                devices.select_input(name)
            } else {
                devices.select_output(name)
            }
        };
        match selected {
            Ok(()) => {
                if was_running {
                    self.start()
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                // An unknown device must not leave a previously running
                // stream down
                if was_running {
                    let _ = self.start();
                }
                Err(e)
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.devices.read().sample_rate()
    }

    pub fn buffer_size(&self) -> u32 {
        self.devices.read().buffer_size()
    }

    /// Apply the nearest supported sample rate through a full
    /// stop/reconfigure/start cycle when running. A `CapabilityMismatch`
    /// still means the substituted value was applied.
    pub fn set_sample_rate(&self, requested: u32) -> Result<u32, EngineError> {
        self.reconfigure(|devices| devices.set_sample_rate(requested))
    }

    /// Same contract as `set_sample_rate`, for the buffer size
    pub fn set_buffer_size(&self, requested: u32) -> Result<u32, EngineError> {
        self.reconfigure(|devices| devices.set_buffer_size(requested))
    }

    fn reconfigure(
        &self,
        apply: impl FnOnce(&mut DeviceManager) -> Result<u32, EngineError>,
    ) -> Result<u32, EngineError> {
        let was_running = self.shared.is_running();
        if was_running {
            self.stop();
        }
        let result = apply(&mut self.devices.write());
        self.sync_shared_config();

        // Rebind loaded instances to the new rate while nothing renders
        let sample_rate = self.shared.sample_rate() as f64;
        for slot in &self.shared.chain.load().slots {
            slot.processor.lock().reconfigure(sample_rate);
        }

        if was_running {
            // A start failure outranks a capability substitution
            self.start()?;
        }
        result
    }

    /// Restore persisted settings; never fails, mismatches are substituted
    pub fn restore(&self, params: &StreamParams) {
        self.devices.write().restore(params);
        self.sync_shared_config();
    }

    pub fn stream_params(&self) -> StreamParams {
        self.devices.read().stream_params()
    }

    fn sync_shared_config(&self) {
        let devices = self.devices.read();
        self.shared
            .sample_rate
            .store(devices.sample_rate(), Ordering::Relaxed);
        self.shared
            .buffer_size
            .store(devices.buffer_size(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Stream lifecycle
    // ------------------------------------------------------------------

    /// Bring the stream up on the current configuration. No-op while
    /// already running.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.shared.is_running() {
            return Ok(());
        }
        let params = self.devices.read().stream_params();
        self.shared.set_state(EngineState::Starting);

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let sent = self
            .control
            .lock()
            .send(StreamCommand::Start {
                params,
                reply: reply_tx,
            })
            .is_ok();
        let result = if sent {
            reply_rx
                .recv()
                .unwrap_or(Err(EngineError::HostUnavailable))
        } else {
            Err(EngineError::HostUnavailable)
        };

        match result {
            Ok(()) => {
                self.shared.set_state(EngineState::Running);
                log::info!("Engine running");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(EngineState::Stopped);
                log::warn!("Engine start failed: {}", e);
                Err(e)
            }
        }
    }

    /// Signal stop and wait for the audio-stack thread's acknowledgment
    /// that the streams are gone. Also cancels a queued start: commands are
    /// processed in order on the audio-stack thread.
    pub fn stop(&self) {
        if self.shared.state() == EngineState::Stopped {
            return;
        }
        self.shared.set_state(EngineState::Stopping);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        if self
            .control
            .lock()
            .send(StreamCommand::Stop { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.recv();
        }
        self.shared.set_state(EngineState::Stopped);
        self.shared.meter.reset();
        log::info!("Engine stopped");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.control.lock().send(StreamCommand::Shutdown);
    }
}

/// Owns every cpal handle. Streams are created and destroyed here and
/// nowhere else.
fn audio_stack_thread(shared: Arc<EngineShared>, commands: Receiver<StreamCommand>) {
    struct ActiveStreams {
        _output: cpal::Stream,
        _input: Option<cpal::Stream>,
    }
    let mut active: Option<ActiveStreams> = None;

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Start { params, reply } => {
                // Old streams go away before the new configuration opens
                active = None;
                match build_streams(&shared, &params) {
                    Ok((output, input)) => {
                        active = Some(ActiveStreams {
                            _output: output,
                            _input: input,
                        });
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            StreamCommand::Stop { reply } => {
                // Dropping joins the callbacks; after this no further
                // callback runs on the old configuration
                active = None;
                let _ = reply.send(());
            }
            StreamCommand::Shutdown => break,
        }
    }
}

fn build_streams(
    shared: &Arc<EngineShared>,
    params: &StreamParams,
) -> Result<(cpal::Stream, Option<cpal::Stream>), EngineError> {
    let host_id = cpal::available_hosts()
        .into_iter()
        .find(|id| id.name() == params.host)
        .ok_or(EngineError::HostUnavailable)?;
    let host = cpal::host_from_id(host_id).map_err(|_| EngineError::HostUnavailable)?;

    let output_device = match &params.output_device {
        Some(name) => host
            .output_devices()
            .map_err(|_| EngineError::NotFound)?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or(EngineError::NotFound)?,
        None => host.default_output_device().ok_or(EngineError::NotFound)?,
    };
    let input_device = params.input_device.as_ref().and_then(|name| {
        host.input_devices()
            .ok()?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
    });

    let buffer_frames = params.buffer_size as usize;
    let stream_config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(params.buffer_size),
    };

    log::info!(
        "Opening streams: host {}, output {:?}, input {:?}, {} Hz / {} frames",
        params.host,
        params.output_device,
        params.input_device,
        params.sample_rate,
        params.buffer_size
    );

    // Capture → render handoff; a couple of buffers of slack so a scheduling
    // hiccup on one side loses at most one buffer at the boundary
    let ring = HeapRb::<f32>::new(buffer_frames * 2 * 4);
    let (mut producer, mut consumer) = ring.split();

    let input_stream = match input_device {
        Some(device) => {
            let input_config = device
                .default_input_config()
                .map(|c| cpal::StreamConfig {
                    channels: c.channels().min(2),
                    sample_rate: cpal::SampleRate(params.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                })
                .map_err(|_| EngineError::NotFound)?;
            let in_channels = input_config.channels as usize;
            let stream = device
                .build_input_stream(
                    &input_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // Normalize to interleaved stereo; overflow drops
                        // the newest frames rather than blocking
                        for frame in data.chunks(in_channels) {
                            let left = frame[0];
                            let right = if frame.len() > 1 { frame[1] } else { left };
                            let _ = producer.try_push(left);
                            let _ = producer.try_push(right);
                        }
                    },
                    |err| log::error!("Input stream error: {}", err),
                    None,
                )
                .map_err(|e| {
                    log::warn!("Failed to build input stream: {}", e);
                    EngineError::NotFound
                })?;
            Some(stream)
        }
        None => None,
    };

    let render_shared = Arc::clone(shared);
    let sample_rate = params.sample_rate as f32;
    let max_scratch = (super::plugin::host::MAX_BLOCK_FRAMES as usize) * 2;
    let mut scratch = vec![0.0f32; max_scratch];

    let output_stream = output_device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let started = Instant::now();
                render_shared.generation.fetch_add(1, Ordering::SeqCst);

                let channels = 2usize;
                let frames = (data.len() / channels).min(max_scratch / 2);
                let block = &mut scratch[..frames * 2];

                // Pull captured input; underrun fills with silence
                for sample in block.iter_mut() {
                    *sample = consumer.try_pop().unwrap_or(0.0);
                }

                let snapshot = render_shared.chain.load();
                render_pass(&snapshot, block, frames);

                // Safety limiter: a misbehaving plugin must not reach the
                // speakers with NaN or > 0 dB
                let mut peak_left = 0.0f32;
                let mut peak_right = 0.0f32;
                for (i, sample) in block.iter_mut().enumerate() {
                    let (limited, _) = sanitize_sample(*sample);
                    *sample = limited;
                    if i % 2 == 0 {
                        peak_left = peak_left.max(limited.abs());
                    } else {
                        peak_right = peak_right.max(limited.abs());
                    }
                }

                for (frame, out) in block.chunks(2).zip(data.chunks_mut(channels)) {
                    out[0] = frame[0];
                    if channels > 1 {
                        out[1] = frame[1];
                    }
                }
                // A device buffer larger than the scratch window gets
                // silence past the processed region, never stale memory
                for sample in data[frames * channels..].iter_mut() {
                    *sample = 0.0;
                }

                render_shared.meter.record_levels(peak_left, peak_right);
                render_shared.meter.record_callback(
                    started.elapsed().as_secs_f32(),
                    frames as f32 / sample_rate,
                );
            },
            |err| log::error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| {
            log::warn!("Failed to build output stream: {}", e);
            EngineError::NotFound
        })?;

    if let Some(input) = &input_stream {
        input.play().map_err(|_| EngineError::HostUnavailable)?;
    }
    output_stream
        .play()
        .map_err(|_| EngineError::HostUnavailable)?;

    Ok((output_stream, input_stream))
}

/// Clamp one sample into [-1, 1], replacing NaN/infinity with silence.
/// Returns the limited sample and whether limiting engaged.
#[inline]
pub fn sanitize_sample(sample: f32) -> (f32, bool) {
    if !sample.is_finite() {
        (0.0, true)
    } else if sample > 1.0 || sample < -1.0 {
        (sample.clamp(-1.0, 1.0), true)
    } else {
        (sample, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_passes_legal_samples_untouched() {
        assert_eq!(sanitize_sample(0.5), (0.5, false));
        assert_eq!(sanitize_sample(-1.0), (-1.0, false));
    }

    #[test]
    fn sanitize_clamps_overs_and_scrubs_nan() {
        assert_eq!(sanitize_sample(1.5), (1.0, true));
        assert_eq!(sanitize_sample(-3.0), (-1.0, true));
        assert_eq!(sanitize_sample(f32::NAN), (0.0, true));
        assert_eq!(sanitize_sample(f32::INFINITY), (0.0, true));
    }

    #[test]
    fn quiescence_wait_returns_immediately_when_stopped() {
        let shared = EngineShared::new();
        let before = Instant::now();
        shared.await_render_quiescent();
        assert!(before.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn state_round_trips_through_the_atomic() {
        let shared = EngineShared::new();
        assert_eq!(shared.state(), EngineState::Stopped);
        shared.set_state(EngineState::Running);
        assert!(shared.is_running());
        shared.set_state(EngineState::Stopping);
        assert_eq!(shared.state(), EngineState::Stopping);
    }
}
