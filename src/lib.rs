//! # Fragment Lists: Order-Independent Transparency on wgpu
//!
//! This crate renders transparent geometry correctly regardless of draw
//! order by capturing *every* fragment touching each pixel into GPU buffers
//! and sorting/blending them per pixel after the fact, with an optional
//! "illustrative" post-process that smooths silhouette and halo weights
//! across sorted fragment neighborhoods.
//!
//! ## Architecture Overview
//!
//! ### 1. Capture ([`rendering::fragment_lists`])
//!
//! A growable storage buffer holds 16-byte fragment records; a screen-sized
//! head buffer holds one linked-list head per pixel. The caller's geometry
//! shaders append fragments through the exported WGSL interface
//! ([`rendering::CAPTURE_SHADER_LIB`]): an atomic counter bump allocates the
//! slot, an atomic exchange on the head prepends it to the pixel's list.
//! Arrival order across shader invocations is racy by design; nothing
//! depends on it except slot allocation itself.
//!
//! ### 2. Resolve ([`FragmentListRenderer::end_frame`])
//!
//! The counter counts every fragment, including ones dropped for lack of
//! space, so reading it back yields the frame's true storage requirement.
//! A frame that did not fit grows the capacity by 10% headroom and returns
//! `false` - the caller re-renders from scratch. A frame that fit is
//! composited either directly (per-pixel sort + back-to-front blend) or via
//! the illustration pipeline.
//!
//! ### 3. Illustration ([`rendering::illustration`])
//!
//! Fill sorts the scattered lists into contiguous per-pixel blocks;
//! resolve-neighbors links adjacent fragments across pixels and seeds
//! silhouette/halo weights; smooth diffuses the weights over the links,
//! ping-ponging between two buffers; draw performs the final weighted blend.
//!
//! **Key design**: every GPU resource is a value with a current size and an
//! ensure-size operation ([`rendering::StorageArray`]); reallocation only
//! happens on mismatch, and cached bind groups are invalidated when it does.
//!
//! ## Usage
//!
//! ```no_run
//! # fn demo(device: &wgpu::Device, queue: &wgpu::Queue, adapter: &wgpu::Adapter,
//! #         target: &wgpu::TextureView) -> Result<(), fragment_lists::RenderError> {
//! use fragment_lists::{FragmentListRenderer, GpuProfile};
//! use glam::UVec2;
//!
//! let profile = GpuProfile::from_adapter(adapter);
//! let mut renderer =
//!     FragmentListRenderer::new(device, &profile, wgpu::TextureFormat::Bgra8UnormSrgb)?;
//!
//! let use_illustration = profile.supports_illustration();
//! loop {
//!     let mut encoder = device.create_command_encoder(&Default::default());
//!     renderer.begin_frame(device, queue, &mut encoder, UVec2::new(1920, 1080));
//!     // ... record capture draws using renderer.bind_group() ...
//!     queue.submit(Some(encoder.finish()));
//!
//!     if renderer.end_frame(device, queue, target, use_illustration, false)? {
//!         break; // frame composited
//!     }
//!     // storage grew: re-render the whole frame
//! }
//! # Ok(()) }
//! ```
//!
//! ## Capability gating
//!
//! [`GpuProfile`](capabilities::GpuProfile) is a plain value, so the gating
//! logic is testable without a GPU: `supports_fragment_lists()` gates the
//! base passes, `supports_illustration()` the post-process. The renderer
//! performs no fallback on its own.
//!
//! ## Dependencies
//!
//! - **Graphics**: `wgpu` (compute + render pipelines, storage buffers)
//! - **Math**: `glam` (vector types), `bytemuck` (safe GPU transmutation)
//! - **Diagnostics**: `log` (allocation and capacity-growth reporting),
//!   `thiserror` (error types)
//! - **Serialization**: `serde` (settings)

pub mod capabilities;
pub mod error;
pub mod rendering;
pub mod settings;

pub use capabilities::GpuProfile;
pub use error::RenderError;
pub use rendering::FragmentListRenderer;
pub use settings::IllustrationSettings;
