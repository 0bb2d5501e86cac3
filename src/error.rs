//! Error types for the fragment-list renderer.
//!
//! Running out of fragment storage is deliberately *not* an error: it is the
//! `Ok(false)` retry signal returned by
//! [`end_frame`](crate::rendering::FragmentListRenderer::end_frame).

use thiserror::Error;

/// Fatal renderer errors. Everything here aborts the current pass; there is
/// no internal recovery or fallback.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The detected hardware profile cannot run fragment lists at all.
    /// Callers are expected to check [`GpuProfile::supports_fragment_lists`]
    /// before constructing the renderer.
    ///
    /// [`GpuProfile::supports_fragment_lists`]: crate::capabilities::GpuProfile::supports_fragment_lists
    #[error("fragment lists require api version >= {needed}, detected {found}")]
    UnsupportedHardware { needed: u32, found: u32 },

    /// Mapping a readback buffer failed on the driver side.
    #[error("failed to map {label} readback buffer: {source}")]
    BufferMap {
        label: &'static str,
        #[source]
        source: wgpu::BufferAsyncError,
    },

    /// The readback completion callback was dropped without firing.
    #[error("readback for {label} was lost before the GPU signalled completion")]
    ReadbackLost { label: &'static str },
}
