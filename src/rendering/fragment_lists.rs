//! Per-pixel fragment list capture and resolve.
//!
//! The renderer owns a growable fragment storage buffer and a screen-sized
//! head buffer forming one linked list per pixel. A frame runs as:
//!
//! 1. [`FragmentListRenderer::begin_frame`] - clear heads, zero the counter.
//! 2. The caller rasterizes its transparent geometry with pipelines that
//!    include the capture interface ([`CAPTURE_SHADER_LIB`]) and this
//!    renderer's bind group, then submits that work.
//! 3. [`FragmentListRenderer::end_frame`] - read the true fragment count
//!    back. If it exceeded capacity the storage grows and `Ok(false)` is
//!    returned: the caller must re-render the whole frame, because the
//!    per-pixel lists already written reference the undersized buffer.
//!    Otherwise the lists are composited, either directly or through the
//!    illustration pipeline.

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec3};

use crate::capabilities::{GpuProfile, FRAGMENT_LISTS_VERSION};
use crate::error::RenderError;
use crate::settings::IllustrationSettings;

use super::debug;
use super::illustration::IllustrationBuffers;
use super::resources::{screen_cells, CapacityTracker, StorageArray};

/// WGSL capture interface for the caller's geometry shaders. Append this to
/// a scene fragment shader and call `oit_store_fragment(pixel, depth, color)`
/// per covered sample. The pipeline must rasterize every sample: depth
/// compare Always, depth writes off, culling disabled.
pub const CAPTURE_SHADER_LIB: &str = include_str!("../../shaders/oit_capture.wgsl");

/// Sentinel marking an empty list head / the end of a per-pixel chain.
pub const INVALID_INDEX: u32 = u32::MAX;

/// Per-pixel fragment cap of the sorting shaders (fixed-size local arrays).
pub const MAX_PIXEL_FRAGMENTS: u32 = 32;

/// One captured fragment, host-side mirror of the GPU record.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct FragmentRecord {
    /// Index of the next-older fragment at the same pixel, or [`INVALID_INDEX`].
    pub previous: u32,
    pub depth: f32,
    pub alpha: f32,
    /// 10-bit rgb, packed as in `oit_pack_color`.
    pub color: u32,
}

/// Pack an rgb color into the 10-bit-per-channel record format.
pub fn pack_color10(rgb: Vec3) -> u32 {
    let c = rgb.clamp(Vec3::ZERO, Vec3::ONE);
    ((c.x * 1023.0) as u32) << 20 | ((c.y * 1023.0) as u32) << 10 | (c.z * 1023.0) as u32
}

/// Unpack a 10-bit-per-channel record color.
pub fn unpack_color10(color: u32) -> Vec3 {
    Vec3::new(
        ((color >> 20) & 0x3ff) as f32,
        ((color >> 10) & 0x3ff) as f32,
        (color & 0x3ff) as f32,
    ) / 1023.0
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct OitParams {
    screen_width: u32,
    screen_height: u32,
    fragment_capacity: u32,
    _pad: u32,
}

/// Order-independent transparency renderer backed by per-pixel linked lists.
pub struct FragmentListRenderer {
    screen_size: UVec2,
    capacity: CapacityTracker,

    heads: StorageArray,
    fragments: StorageArray,
    counter: wgpu::Buffer,
    counter_staging: wgpu::Buffer,
    params_buffer: wgpu::Buffer,

    oit_bind_group_layout: wgpu::BindGroupLayout,
    oit_bind_group: Option<wgpu::BindGroup>,

    clear_pipeline: wgpu::ComputePipeline,
    display_pipeline: wgpu::RenderPipeline,

    illustration: IllustrationBuffers,
    settings: IllustrationSettings,
}

impl FragmentListRenderer {
    /// Create the renderer and its five pipelines.
    ///
    /// `target_format` is the color format of the frame buffer the display
    /// and illustration-draw passes blend into. Fails with
    /// [`RenderError::UnsupportedHardware`] when `profile` cannot run
    /// fragment lists; illustration support should additionally be checked
    /// via [`GpuProfile::supports_illustration`] before passing
    /// `use_illustration = true` to [`end_frame`](Self::end_frame).
    pub fn new(
        device: &wgpu::Device,
        profile: &GpuProfile,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self, RenderError> {
        if !profile.supports_fragment_lists() {
            return Err(RenderError::UnsupportedHardware {
                needed: FRAGMENT_LISTS_VERSION,
                found: profile.api_version,
            });
        }

        let storage_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        // Fixed assignments: uniforms at 0, heads at 1, the global atomic
        // counter at 6 and the fragment storage at 7. Bindings 2-5 are
        // reserved for the caller's own resources in capture pipelines.
        let oit_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("OIT Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    storage_entry(1),
                    storage_entry(6),
                    storage_entry(7),
                ],
            });

        let clear_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("OIT Clear Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/oit_clear.wgsl").into()),
        });

        let display_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("OIT Display Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/oit_display.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("OIT Pipeline Layout"),
            bind_group_layouts: &[&oit_bind_group_layout],
            push_constant_ranges: &[],
        });

        let clear_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("OIT Clear Pipeline"),
            layout: Some(&pipeline_layout),
            module: &clear_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let display_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("OIT Display Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &display_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &display_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Fragment Counter"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let counter_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Fragment Counter Staging"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Params Buffer"),
            size: std::mem::size_of::<OitParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let heads = StorageArray::new(
            "OIT Head Buffer",
            std::mem::size_of::<u32>() as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let fragments = StorageArray::new(
            "OIT Fragment Storage",
            std::mem::size_of::<FragmentRecord>() as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );

        let illustration = IllustrationBuffers::new(device, &oit_bind_group_layout, target_format);

        Ok(Self {
            screen_size: UVec2::ZERO,
            capacity: CapacityTracker::default(),
            heads,
            fragments,
            counter,
            counter_staging,
            params_buffer,
            oit_bind_group_layout,
            oit_bind_group: None,
            clear_pipeline,
            display_pipeline,
            illustration,
            settings: IllustrationSettings::default(),
        })
    }

    /// Current viewport the buffers are sized for.
    pub fn screen_size(&self) -> UVec2 {
        self.screen_size
    }

    /// Current fragment storage capacity, in records.
    pub fn fragment_capacity(&self) -> u32 {
        self.capacity.capacity()
    }

    pub fn settings(&self) -> &IllustrationSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut IllustrationSettings {
        &mut self.settings
    }

    /// Layout of the capture bind group, for building caller pipelines that
    /// include [`CAPTURE_SHADER_LIB`].
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.oit_bind_group_layout
    }

    /// The capture bind group (group 0 of the capture interface). Valid
    /// between `begin_frame` and `end_frame`.
    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.oit_bind_group.as_ref()
    }

    /// Prepare the frame: size buffers to the viewport and current capacity,
    /// zero the fragment counter and clear every list head to the empty
    /// sentinel. Record order within `encoder` puts the clear pass before
    /// any capture draw the caller records afterwards.
    pub fn begin_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        screen_size: UVec2,
    ) {
        self.screen_size = screen_size;

        let mut reallocated = self.heads.ensure_len(device, screen_cells(screen_size));
        reallocated |= self
            .fragments
            .ensure_len(device, u64::from(self.capacity.capacity()));
        if reallocated {
            self.oit_bind_group = None;
        }

        let params = OitParams {
            screen_width: screen_size.x,
            screen_height: screen_size.y,
            fragment_capacity: self.capacity.capacity(),
            _pad: 0,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(&self.counter, 0, bytemuck::bytes_of(&0u32));

        if self.oit_bind_group.is_none() {
            self.oit_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("OIT Bind Group"),
                layout: &self.oit_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.heads.buffer().as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: self.counter.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: self.fragments.buffer().as_entire_binding(),
                    },
                ],
            }));
        }

        let bind_group = self.oit_bind_group.as_ref().unwrap();
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("OIT Clear Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.clear_pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups((screen_size.x + 7) / 8, (screen_size.y + 7) / 8, 1);
    }

    /// Resolve the frame after all capture work has been **submitted**.
    ///
    /// Returns `Ok(false)` when the frame produced more fragments than the
    /// storage holds: capacity has grown by 10% headroom over the observed
    /// count, current-frame bindings are released, and the caller must
    /// re-render the entire frame. Returns `Ok(true)` once the lists were
    /// composited into `target`, either directly (`use_illustration ==
    /// false`) or through the fill / resolve-neighbors / smooth / draw
    /// illustration pipeline.
    ///
    /// `debug` enables a synchronous read-back and dump of every buffer; it
    /// stalls the GPU and is meant for inspecting small viewports only.
    pub fn end_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        use_illustration: bool,
        debug: bool,
    ) -> Result<bool, RenderError> {
        let num_frags = self.read_fragment_count(device, queue)?;

        if debug {
            let dump = debug::read_fragment_lists(device, queue, self, num_frags)?;
            log::debug!("{}", debug::fmt_fragment_lists(&dump));
        }

        if !self.capacity.admit(num_frags) {
            // Release current-frame bindings before the caller retries; the
            // grown storage is allocated by the next begin_frame.
            self.oit_bind_group = None;
            self.illustration.invalidate_bind_groups();
            return Ok(false);
        }

        let bind_group = self
            .oit_bind_group
            .as_ref()
            .expect("begin_frame must run before end_frame");

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("OIT Resolve Encoder"),
        });

        if !use_illustration {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("OIT Display Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.display_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..3, 0..1);
        } else {
            // The illustration passes only run when the whole frame fit, so
            // block allocation in the fill shader can never overflow.
            self.illustration
                .resize(device, self.screen_size, self.capacity.capacity());
            self.illustration
                .ensure_bind_groups(device, self.fragments.buffer());
            self.illustration.upload_params(
                queue,
                self.screen_size,
                self.capacity.capacity(),
                &self.settings.clamped(),
            );
            // Re-zero the counter: the fill pass reuses it as the
            // block-offset allocator. Ordered before the encoder below.
            queue.write_buffer(&self.counter, 0, bytemuck::bytes_of(&0u32));

            self.illustration
                .fill(&mut encoder, bind_group, self.screen_size);
            self.illustration
                .process(&mut encoder, self.screen_size, self.settings.smoothing_steps);
            self.illustration.draw(&mut encoder, target);
        }

        queue.submit(Some(encoder.finish()));

        if use_illustration && debug {
            let dump = debug::read_illustration_buffers(device, queue, self, num_frags)?;
            log::debug!("{}", debug::fmt_illustration_buffers(&dump));
        }

        Ok(true)
    }

    /// Read the frame's true fragment count back from the global counter.
    ///
    /// The capture shader increments the counter for every fragment, also
    /// the ones dropped for lack of space, so this is the exact storage size
    /// the frame needed. Blocking: the submit boundary doubles as the
    /// visibility barrier for all capture writes.
    fn read_fragment_count(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<u32, RenderError> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("OIT Counter Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(
            &self.counter,
            0,
            &self.counter_staging,
            0,
            std::mem::size_of::<u32>() as u64,
        );
        queue.submit(Some(encoder.finish()));

        let slice = self.counter_staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        let _ = device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });

        match receiver.try_recv() {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(RenderError::BufferMap {
                    label: "fragment counter",
                    source,
                })
            }
            Err(_) => {
                return Err(RenderError::ReadbackLost {
                    label: "fragment counter",
                })
            }
        }

        let value = {
            let data = slice.get_mapped_range();
            *bytemuck::from_bytes::<u32>(&data)
        };
        self.counter_staging.unmap();
        Ok(value)
    }

    pub(crate) fn heads_buffer(&self) -> &wgpu::Buffer {
        self.heads.buffer()
    }

    pub(crate) fn fragments_buffer(&self) -> &wgpu::Buffer {
        self.fragments.buffer()
    }

    pub(crate) fn counter_buffer(&self) -> &wgpu::Buffer {
        &self.counter
    }

    pub(crate) fn illustration(&self) -> &IllustrationBuffers {
        &self.illustration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_pack_roundtrip_spot_checks() {
        for rgb in [
            Vec3::ZERO,
            Vec3::ONE,
            Vec3::new(0.5, 0.25, 0.75),
            Vec3::new(1.0, 0.0, 1.0),
        ] {
            let unpacked = unpack_color10(pack_color10(rgb));
            // 10 bits per channel: worst-case quantization error 1/1023.
            assert!((unpacked - rgb).abs().max_element() <= 1.0 / 1023.0);
        }
    }

    #[test]
    fn pack_clamps_out_of_range_input() {
        assert_eq!(pack_color10(Vec3::new(2.0, -1.0, 0.0)), pack_color10(Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn fragment_record_layout_matches_gpu() {
        assert_eq!(std::mem::size_of::<FragmentRecord>(), 16);
        assert_eq!(std::mem::size_of::<OitParams>(), 16);
    }
}
