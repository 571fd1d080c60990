//! The plugin processing chain and its lock-free publication
//!
//! The control thread builds immutable `ChainSnapshot`s and publishes them
//! through an `ArcSwap`; the render callback loads whatever snapshot is
//! current and walks it. Enable/bypass are per-slot atomics flipped in
//! place, so flipping them never republishes the chain.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Engine-unique instance identifier. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InstanceId(pub u64);

/// Hands out instance ids. An id is only consumed once a module has
/// initialized successfully, so failed loads never burn one.
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> InstanceId {
        InstanceId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// What the UI sees of a loaded instance
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPlugin {
    pub id: u64,
    pub name: String,
}

/// The narrow capability surface the render pass drives.
///
/// The CLAP-backed implementation lives in `plugin::host`; tests use
/// synthetic processors.
pub trait ChainProcessor: Send {
    /// Drain pending editor state into the instance. Must not block.
    fn apply_pending_state(&mut self);

    /// Process one interleaved stereo block in place. Returning `false`
    /// leaves the buffer as-is (treated as pass-through for this block).
    fn process_in_place(&mut self, buffer: &mut [f32], frames: usize) -> bool;

    /// Rebind the processor to a new sample rate. Only called while the
    /// stream is stopped.
    fn reconfigure(&mut self, sample_rate: f64);
}

/// One live instance in the chain
pub struct ChainSlot {
    pub id: InstanceId,
    pub name: String,
    pub path: PathBuf,
    enabled: AtomicBool,
    bypassed: AtomicBool,
    /// Render side takes this with `try_lock` only; a contended block
    /// passes audio through unchanged instead of waiting.
    pub processor: Mutex<Box<dyn ChainProcessor>>,
    /// Producer half of the editor state channel; the consumer half lives
    /// inside the processor.
    editor_state: Mutex<Sender<Vec<u8>>>,
}

impl ChainSlot {
    pub fn new(
        id: InstanceId,
        name: String,
        path: PathBuf,
        processor: Box<dyn ChainProcessor>,
        editor_state: Sender<Vec<u8>>,
    ) -> Self {
        Self {
            id,
            name,
            path,
            enabled: AtomicBool::new(true),
            bypassed: AtomicBool::new(false),
            processor: Mutex::new(processor),
            editor_state: Mutex::new(editor_state),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Relaxed);
    }

    pub fn editor_state_sender(&self) -> Sender<Vec<u8>> {
        self.editor_state.lock().clone()
    }

    pub fn info(&self) -> LoadedPlugin {
        LoadedPlugin {
            id: self.id.0,
            name: self.name.clone(),
        }
    }
}

/// Immutable, ordered view of the chain
pub struct ChainSnapshot {
    pub slots: Vec<Arc<ChainSlot>>,
}

impl ChainSnapshot {
    pub fn empty() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn find(&self, id: InstanceId) -> Option<&Arc<ChainSlot>> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn with_appended(&self, slot: Arc<ChainSlot>) -> Self {
        let mut slots = self.slots.clone();
        slots.push(slot);
        Self { slots }
    }

    pub fn without(&self, id: InstanceId) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect(),
        }
    }

    pub fn infos(&self) -> Vec<LoadedPlugin> {
        self.slots.iter().map(|s| s.info()).collect()
    }
}

/// One render callback's walk over the chain. Runs on the real-time path:
/// no allocation, no blocking locks.
#[inline]
pub fn render_pass(snapshot: &ChainSnapshot, buffer: &mut [f32], frames: usize) {
    for slot in &snapshot.slots {
        if !slot.is_enabled() {
            continue;
        }
        if slot.is_bypassed() {
            continue;
        }
        if let Some(mut processor) = slot.processor.try_lock() {
            processor.apply_pending_state();
            processor.process_in_place(buffer, frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Adds a constant offset to every sample; counts invocations
    struct OffsetProcessor {
        offset: f32,
        calls: Arc<AtomicU64>,
    }

    impl ChainProcessor for OffsetProcessor {
        fn apply_pending_state(&mut self) {}

        fn process_in_place(&mut self, buffer: &mut [f32], frames: usize) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            for sample in buffer.iter_mut().take(frames * 2) {
                *sample += self.offset;
            }
            true
        }

        fn reconfigure(&mut self, _sample_rate: f64) {}
    }

    fn make_slot(id: u64, offset: f32, calls: Arc<AtomicU64>) -> Arc<ChainSlot> {
        let (tx, _rx) = mpsc::channel();
        Arc::new(ChainSlot::new(
            InstanceId(id),
            format!("offset-{}", id),
            PathBuf::from(format!("/plugins/offset-{}.clap", id)),
            Box::new(OffsetProcessor { offset, calls }),
            tx,
        ))
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let ids = IdAllocator::new();
        let first = ids.allocate();
        let second = ids.allocate();
        assert!(second.0 > first.0);
        // A failed load allocates nothing, so the next id still advances
        let third = ids.allocate();
        assert_eq!(third.0, second.0 + 1);
    }

    #[test]
    fn enabled_slots_process_in_chain_order() {
        let calls = Arc::new(AtomicU64::new(0));
        let snapshot = ChainSnapshot::empty()
            .with_appended(make_slot(1, 1.0, calls.clone()))
            .with_appended(make_slot(2, 10.0, calls.clone()));

        let mut buffer = vec![0.0f32; 8];
        render_pass(&snapshot, &mut buffer, 4);
        assert!(buffer.iter().all(|&s| s == 11.0));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn bypassed_slot_is_bit_exact_pass_through() {
        let calls = Arc::new(AtomicU64::new(0));
        let slot = make_slot(1, 5.0, calls.clone());
        slot.set_bypassed(true);
        let snapshot = ChainSnapshot::empty().with_appended(slot);

        let original = vec![0.25f32, -0.5, 0.75, -1.0];
        let mut buffer = original.clone();
        render_pass(&snapshot, &mut buffer, 2);
        assert_eq!(buffer, original);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn disabled_slot_contributes_no_processing_time() {
        let calls = Arc::new(AtomicU64::new(0));
        let slot = make_slot(1, 5.0, calls.clone());
        slot.set_enabled(false);
        let snapshot = ChainSnapshot::empty().with_appended(slot);

        let mut buffer = vec![0.5f32; 4];
        render_pass(&snapshot, &mut buffer, 2);
        assert_eq!(buffer, vec![0.5f32; 4]);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn removal_leaves_membership_a_subset_of_loaded() {
        let calls = Arc::new(AtomicU64::new(0));
        let snapshot = ChainSnapshot::empty()
            .with_appended(make_slot(1, 0.0, calls.clone()))
            .with_appended(make_slot(2, 0.0, calls.clone()))
            .with_appended(make_slot(3, 0.0, calls));

        let shrunk = snapshot.without(InstanceId(2));
        assert_eq!(shrunk.slots.len(), 2);
        assert!(shrunk.find(InstanceId(2)).is_none());
        assert!(shrunk.find(InstanceId(1)).is_some());
        assert!(shrunk.find(InstanceId(3)).is_some());
        // The original snapshot is untouched; readers holding it stay valid
        assert_eq!(snapshot.slots.len(), 3);
    }

    #[test]
    fn contended_slot_passes_audio_through() {
        let calls = Arc::new(AtomicU64::new(0));
        let slot = make_slot(1, 5.0, calls.clone());
        let snapshot = ChainSnapshot::empty().with_appended(slot.clone());

        let _held = slot.processor.lock();
        let mut buffer = vec![0.1f32; 4];
        render_pass(&snapshot, &mut buffer, 2);
        assert_eq!(buffer, vec![0.1f32; 4]);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }
}
