//! Grow-on-demand GPU resources shared by the OIT passes.
//!
//! Every buffer in the renderer follows the same pattern: it knows its
//! current element count and reallocates only when asked for a different
//! one. Callers watch the return value of [`StorageArray::ensure_len`] to
//! invalidate cached bind groups.

use glam::UVec2;

/// A storage buffer sized in fixed-stride elements, reallocated on demand.
pub struct StorageArray {
    label: &'static str,
    stride: u64,
    usage: wgpu::BufferUsages,
    len: u64,
    buffer: Option<wgpu::Buffer>,
}

impl StorageArray {
    pub fn new(label: &'static str, stride: u64, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            stride,
            usage,
            len: 0,
            buffer: None,
        }
    }

    /// Current element count (zero before the first allocation).
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.len * self.stride
    }

    /// Whether a call to [`ensure_len`](Self::ensure_len) with this length
    /// would reallocate.
    pub fn needs_realloc(&self, len: u64) -> bool {
        realloc_needed(self.buffer.as_ref().map(|_| self.len), len)
    }

    /// Make the buffer hold exactly `len` elements. Returns `true` when a
    /// reallocation happened (invalidating any bind group holding the old
    /// buffer), `false` when the call was a no-op.
    pub fn ensure_len(&mut self, device: &wgpu::Device, len: u64) -> bool {
        if !self.needs_realloc(len) {
            return false;
        }
        self.len = len;
        let size = (len.max(1) * self.stride).max(wgpu::COPY_BUFFER_ALIGNMENT);
        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size,
            usage: self.usage,
            mapped_at_creation: false,
        }));
        log::info!(
            "{}: allocated {} elements ({:.2} MB)",
            self.label,
            len,
            size as f64 / (1024.0 * 1024.0)
        );
        true
    }

    /// The underlying buffer. Valid after the first `ensure_len`.
    pub fn buffer(&self) -> &wgpu::Buffer {
        self.buffer
            .as_ref()
            .expect("ensure_len must run before the buffer is bound")
    }
}

/// Pure form of the reallocation decision. `current` is the allocated
/// element count, `None` before the first allocation; only a length change
/// (or the very first request) reallocates, so repeating a request is a
/// no-op.
pub(crate) fn realloc_needed(current: Option<u64>, requested: u64) -> bool {
    current != Some(requested)
}

/// Number of screen-buffer elements for a viewport.
pub fn screen_cells(screen_size: UVec2) -> u64 {
    u64::from(screen_size.x) * u64::from(screen_size.y)
}

/// Explicit double-buffer toggle for the smoothing buffers.
///
/// The buffer at `active()` holds the latest valid data and is the only one
/// a pass may read; every pass writes `inactive()` and flips afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingPong {
    active: usize,
}

impl PingPong {
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn inactive(&self) -> usize {
        1 - self.active
    }

    pub fn flip(&mut self) {
        self.active = 1 - self.active;
    }
}

/// Initial fragment storage capacity, in records.
pub const INITIAL_FRAGMENT_CAPACITY: u32 = 1024;

/// Fragment storage admission policy: capacity only grows, by 10% headroom
/// over the largest observed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityTracker {
    capacity: u32,
}

impl Default for CapacityTracker {
    fn default() -> Self {
        Self {
            capacity: INITIAL_FRAGMENT_CAPACITY,
        }
    }
}

impl CapacityTracker {
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Check a frame's true fragment count against the current capacity.
    ///
    /// Returns `true` when the frame fit. Returns `false` when it did not;
    /// the capacity has then already grown to `ceil(1.1 × actual_count)` and
    /// the caller must re-render the frame from scratch, since the per-pixel
    /// lists written so far reference the undersized buffer.
    pub fn admit(&mut self, actual_count: u32) -> bool {
        if actual_count <= self.capacity {
            return true;
        }
        let grown = grown_capacity(actual_count);
        log::info!(
            "fragment lists resolved, fragments drawn: {}, available: {}, allocating space for {}",
            actual_count,
            self.capacity,
            grown
        );
        self.capacity = grown;
        false
    }
}

/// `ceil(1.1 × actual_count)` in integer math, so the result is exact for
/// counts where a float product would round up spuriously. Saturates at
/// `u32::MAX` instead of wrapping for counts near the counter's limit.
pub(crate) fn grown_capacity(actual_count: u32) -> u32 {
    actual_count.saturating_add(actual_count.div_ceil(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_flips_between_two_slots() {
        let mut pp = PingPong::default();
        assert_eq!(pp.active(), 0);
        assert_eq!(pp.inactive(), 1);

        // One flip for resolve-neighbors, then k flips for k smoothing
        // iterations: active index is (initial + 1 + k) mod 2 throughout.
        pp.flip();
        for k in 0..8 {
            assert_eq!(pp.active(), (1 + k) % 2);
            assert_ne!(pp.active(), pp.inactive());
            pp.flip();
        }
    }

    #[test]
    fn admit_within_capacity_does_not_grow() {
        let mut tracker = CapacityTracker::default();
        assert!(tracker.admit(0));
        assert!(tracker.admit(1024));
        assert_eq!(tracker.capacity(), INITIAL_FRAGMENT_CAPACITY);
    }

    #[test]
    fn admit_over_capacity_grows_with_headroom() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut tracker = CapacityTracker { capacity: 10 };
        assert!(!tracker.admit(10_000));
        assert_eq!(tracker.capacity(), 11_000);
        // Retry with the same scene now fits.
        assert!(tracker.admit(10_000));
        assert_eq!(tracker.capacity(), 11_000);
    }

    #[test]
    fn grown_capacity_bounds() {
        for actual in [1u32, 7, 10, 11, 1024, 1025, 9999, 10_000, 1_000_000] {
            let old = actual - 1; // growth only happens when actual > old
            let grown = grown_capacity(actual);
            assert!(grown > old);
            assert!(f64::from(grown) >= 1.1 * f64::from(actual) - 1e-6);
        }
        assert_eq!(grown_capacity(10_000), 11_000);
        assert_eq!(grown_capacity(10), 11);
    }

    #[test]
    fn grown_capacity_saturates_near_counter_limit() {
        // No wrap for counts where adding 10% headroom would overflow.
        assert_eq!(grown_capacity(u32::MAX), u32::MAX);
        assert_eq!(grown_capacity(u32::MAX - 1), u32::MAX);
        assert_eq!(grown_capacity(4_000_000_000), u32::MAX);
    }

    #[test]
    fn storage_array_realloc_decision() {
        let array = StorageArray::new("test", 16, wgpu::BufferUsages::STORAGE);
        // Unallocated buffers always need an allocation, even for length 0.
        assert!(array.needs_realloc(0));
        assert!(array.needs_realloc(1024));
        assert_eq!(array.len(), 0);
    }

    #[test]
    fn realloc_only_happens_on_length_change() {
        assert!(realloc_needed(None, 0));
        assert!(realloc_needed(None, 1024));
        // Re-requesting the allocated length is a no-op; any other length
        // reallocates, shrinking included.
        assert!(!realloc_needed(Some(1024), 1024));
        assert!(realloc_needed(Some(1024), 2048));
        assert!(realloc_needed(Some(1024), 512));
    }

    #[test]
    fn screen_cells_matches_viewport() {
        assert_eq!(screen_cells(UVec2::new(4, 4)), 16);
        assert_eq!(screen_cells(UVec2::new(100, 100)), 10_000);
        assert_eq!(screen_cells(UVec2::new(0, 100)), 0);
    }
}
