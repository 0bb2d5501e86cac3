//! Illustration buffers: per-pixel sorted block storage with silhouette and
//! halo post-processing.
//!
//! The fill pass converts the scattered per-pixel linked lists into
//! contiguous depth-sorted blocks (block start/count per pixel), which makes
//! neighbor fragments addressable. Resolve-neighbors links each fragment to
//! the nearest-depth fragment in the four adjacent pixels and seeds the
//! silhouette (beta) and halo (gamma) weights; the smooth pass then diffuses
//! those weights across the links for a configured number of iterations,
//! ping-ponging between two buffers; the draw pass performs the final
//! weighted blend.
//!
//! Neighborhood storage reuses the base fragment-list buffer: once the fill
//! pass has copied everything into blocks, the 16-byte records are dead for
//! the rest of the frame and fit one `vec4<i32>` of neighbor links each.

use bytemuck::{Pod, Zeroable};
use glam::UVec2;

use crate::settings::IllustrationSettings;

use super::resources::{screen_cells, PingPong, StorageArray};

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct IllustrationParams {
    screen_width: u32,
    screen_height: u32,
    fragment_capacity: u32,
    _pad0: u32,
    /// rgb + edge strength in w.
    edge_color: [f32; 4],
    lambda_beta: f32,
    lambda_gamma: f32,
    halo_strength: f32,
    _pad1: f32,
}

pub struct IllustrationBuffers {
    /// First fragment of each pixel's block, `INVALID_INDEX` when empty.
    index: StorageArray,
    /// Fragments in each pixel's block.
    count: StorageArray,
    /// alpha + bitcast packed rgb per fragment.
    color: StorageArray,
    /// depth + gradient per fragment.
    surface_info: StorageArray,
    /// beta (edge) + gamma (halo), double buffered across iterations.
    smoothing: [StorageArray; 2],
    active_smoothing: PingPong,

    params_buffer: wgpu::Buffer,

    common_layout: wgpu::BindGroupLayout,
    fill_layout: wgpu::BindGroupLayout,
    pass_compute_layout: wgpu::BindGroupLayout,
    draw_layout: wgpu::BindGroupLayout,

    fill_pipeline: wgpu::ComputePipeline,
    resolve_pipeline: wgpu::ComputePipeline,
    smooth_pipeline: wgpu::ComputePipeline,
    draw_pipeline: wgpu::RenderPipeline,

    // Cached bind groups, recreated after any reallocation. The per-pass
    // arrays are indexed by the ping-pong's active slot at dispatch time.
    common_bind_group: Option<wgpu::BindGroup>,
    fill_bind_group: Option<wgpu::BindGroup>,
    resolve_bind_groups: Option<[wgpu::BindGroup; 2]>,
    smooth_bind_groups: Option<[wgpu::BindGroup; 2]>,
    draw_bind_groups: Option<[wgpu::BindGroup; 2]>,
}

impl IllustrationBuffers {
    pub fn new(
        device: &wgpu::Device,
        oit_layout: &wgpu::BindGroupLayout,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        let storage_entry = |binding: u32, visibility: wgpu::ShaderStages| {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }
        };

        let both = wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT;

        // Shared by resolve/smooth/draw: params + block index/count.
        let common_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Illustration Common Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: both,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, both),
                storage_entry(2, both),
            ],
        });

        // Fill outputs: color, surface info, block index, block count.
        let fill_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Illustration Fill Bind Group Layout"),
            entries: &[
                storage_entry(0, wgpu::ShaderStages::COMPUTE),
                storage_entry(1, wgpu::ShaderStages::COMPUTE),
                storage_entry(2, wgpu::ShaderStages::COMPUTE),
                storage_entry(3, wgpu::ShaderStages::COMPUTE),
            ],
        });

        // Resolve and smooth both take three pass-specific buffers at 0/1/2.
        let pass_compute_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Illustration Pass Bind Group Layout"),
                entries: &[
                    storage_entry(0, wgpu::ShaderStages::COMPUTE),
                    storage_entry(1, wgpu::ShaderStages::COMPUTE),
                    storage_entry(2, wgpu::ShaderStages::COMPUTE),
                ],
            });

        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Illustration Draw Bind Group Layout"),
            entries: &[
                storage_entry(0, wgpu::ShaderStages::FRAGMENT),
                storage_entry(1, wgpu::ShaderStages::FRAGMENT),
                storage_entry(2, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let fill_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Illustration Fill Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/illustration_fill.wgsl").into(),
            ),
        });
        let resolve_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Illustration Resolve Neighbors Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/illustration_resolve.wgsl").into(),
            ),
        });
        let smooth_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Illustration Smooth Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/illustration_smooth.wgsl").into(),
            ),
        });
        let draw_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Illustration Draw Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/illustration_draw.wgsl").into(),
            ),
        });

        let fill_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Illustration Fill Pipeline Layout"),
                bind_group_layouts: &[oit_layout, &fill_layout],
                push_constant_ranges: &[],
            });
        let pass_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Illustration Pass Pipeline Layout"),
                bind_group_layouts: &[&common_layout, &pass_compute_layout],
                push_constant_ranges: &[],
            });
        let draw_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Illustration Draw Pipeline Layout"),
                bind_group_layouts: &[&common_layout, &draw_layout],
                push_constant_ranges: &[],
            });

        let compute_pipeline = |label, layout: &wgpu::PipelineLayout, module| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let fill_pipeline =
            compute_pipeline("Illustration Fill Pipeline", &fill_pipeline_layout, &fill_shader);
        let resolve_pipeline = compute_pipeline(
            "Illustration Resolve Neighbors Pipeline",
            &pass_pipeline_layout,
            &resolve_shader,
        );
        let smooth_pipeline = compute_pipeline(
            "Illustration Smooth Pipeline",
            &pass_pipeline_layout,
            &smooth_shader,
        );

        let draw_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Illustration Draw Pipeline"),
            layout: Some(&draw_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &draw_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &draw_shader,
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

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Illustration Params Buffer"),
            size: std::mem::size_of::<IllustrationParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let vec2_stride = (2 * std::mem::size_of::<f32>()) as u64;

        Self {
            index: StorageArray::new("Illustration Block Index", 4, storage),
            count: StorageArray::new("Illustration Block Count", 4, storage),
            color: StorageArray::new("Illustration Color", vec2_stride, storage),
            surface_info: StorageArray::new("Illustration Surface Info", vec2_stride, storage),
            smoothing: [
                StorageArray::new("Illustration Smoothing 0", vec2_stride, storage),
                StorageArray::new("Illustration Smoothing 1", vec2_stride, storage),
            ],
            active_smoothing: PingPong::default(),
            params_buffer,
            common_layout,
            fill_layout,
            pass_compute_layout,
            draw_layout,
            fill_pipeline,
            resolve_pipeline,
            smooth_pipeline,
            draw_pipeline,
            common_bind_group: None,
            fill_bind_group: None,
            resolve_bind_groups: None,
            smooth_bind_groups: None,
            draw_bind_groups: None,
        }
    }

    /// Size the two screen buffers and four fragment buffers. Reallocates
    /// only what actually changed; a second call with the same sizes is a
    /// no-op.
    pub fn resize(&mut self, device: &wgpu::Device, screen_size: UVec2, fragment_capacity: u32) {
        let cells = screen_cells(screen_size);
        let capacity = u64::from(fragment_capacity);

        let mut reallocated = self.index.ensure_len(device, cells);
        reallocated |= self.count.ensure_len(device, cells);
        reallocated |= self.color.ensure_len(device, capacity);
        reallocated |= self.surface_info.ensure_len(device, capacity);
        for smoothing in &mut self.smoothing {
            reallocated |= smoothing.ensure_len(device, capacity);
        }
        if reallocated {
            self.invalidate_bind_groups();
        }
    }

    /// Drop every cached bind group. Called after reallocation here, and by
    /// the renderer when the base fragment buffer (our neighbor storage)
    /// grows or a failed frame releases its bindings.
    pub fn invalidate_bind_groups(&mut self) {
        self.common_bind_group = None;
        self.fill_bind_group = None;
        self.resolve_bind_groups = None;
        self.smooth_bind_groups = None;
        self.draw_bind_groups = None;
    }

    /// Recreate cached bind groups if needed. `fragments` is the base
    /// fragment-list buffer, reused here as neighbor storage.
    pub fn ensure_bind_groups(&mut self, device: &wgpu::Device, fragments: &wgpu::Buffer) {
        if self.common_bind_group.is_some() {
            return;
        }

        fn entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
            wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            }
        }

        self.common_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Illustration Common Bind Group"),
            layout: &self.common_layout,
            entries: &[
                entry(0, &self.params_buffer),
                entry(1, self.index.buffer()),
                entry(2, self.count.buffer()),
            ],
        }));

        self.fill_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Illustration Fill Bind Group"),
            layout: &self.fill_layout,
            entries: &[
                entry(0, self.color.buffer()),
                entry(1, self.surface_info.buffer()),
                entry(2, self.index.buffer()),
                entry(3, self.count.buffer()),
            ],
        }));

        // One variant per ping-pong orientation; indexed by the active slot
        // at dispatch time so the inactive buffer is always the one written.
        self.resolve_bind_groups = Some([0usize, 1].map(|active| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Illustration Resolve Bind Group"),
                layout: &self.pass_compute_layout,
                entries: &[
                    entry(0, self.surface_info.buffer()),
                    entry(1, fragments),
                    entry(2, self.smoothing[1 - active].buffer()),
                ],
            })
        }));

        self.smooth_bind_groups = Some([0usize, 1].map(|active| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Illustration Smooth Bind Group"),
                layout: &self.pass_compute_layout,
                entries: &[
                    entry(0, fragments),
                    entry(1, self.smoothing[active].buffer()),
                    entry(2, self.smoothing[1 - active].buffer()),
                ],
            })
        }));

        self.draw_bind_groups = Some([0usize, 1].map(|active| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Illustration Draw Bind Group"),
                layout: &self.draw_layout,
                entries: &[
                    entry(0, self.surface_info.buffer()),
                    entry(1, self.color.buffer()),
                    entry(2, self.smoothing[active].buffer()),
                ],
            })
        }));
    }

    /// Upload the per-frame uniform from the (already clamped) settings.
    pub fn upload_params(
        &self,
        queue: &wgpu::Queue,
        screen_size: UVec2,
        fragment_capacity: u32,
        settings: &IllustrationSettings,
    ) {
        let params = IllustrationParams {
            screen_width: screen_size.x,
            screen_height: screen_size.y,
            fragment_capacity,
            _pad0: 0,
            edge_color: [
                settings.edge_color.x,
                settings.edge_color.y,
                settings.edge_color.z,
                settings.edge_strength,
            ],
            lambda_beta: 1.0 - settings.edge_smoothing,
            lambda_gamma: 1.0 - settings.halo_smoothing,
            halo_strength: settings.halo_strength,
            _pad1: 0.0,
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
    }

    /// Sort the linked lists into contiguous per-pixel blocks. The global
    /// counter must be re-zeroed before this pass; block offsets are
    /// bump-allocated from it.
    pub fn fill(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        oit_bind_group: &wgpu::BindGroup,
        screen_size: UVec2,
    ) {
        let fill_bind_group = self
            .fill_bind_group
            .as_ref()
            .expect("ensure_bind_groups must run before fill");

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Illustration Fill Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.fill_pipeline);
        pass.set_bind_group(0, oit_bind_group, &[]);
        pass.set_bind_group(1, fill_bind_group, &[]);
        pass.dispatch_workgroups((screen_size.x + 7) / 8, (screen_size.y + 7) / 8, 1);
    }

    /// Resolve neighbor links and seed the smoothing weights, then run the
    /// configured number of smoothing iterations. The ping-pong flips once
    /// after the resolve pass and once after every iteration; the buffer
    /// being read is never the one being written.
    pub fn process(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        screen_size: UVec2,
        smoothing_steps: u32,
    ) {
        let common = self
            .common_bind_group
            .as_ref()
            .expect("ensure_bind_groups must run before process");
        let resolve_groups = self.resolve_bind_groups.as_ref().unwrap();
        let smooth_groups = self.smooth_bind_groups.as_ref().unwrap();

        let workgroups = ((screen_size.x + 7) / 8, (screen_size.y + 7) / 8);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Illustration Resolve Neighbors Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.resolve_pipeline);
            pass.set_bind_group(0, common, &[]);
            pass.set_bind_group(1, &resolve_groups[self.active_smoothing.active()], &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
        }
        self.active_smoothing.flip();

        for _ in 0..smoothing_steps {
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Illustration Smooth Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.smooth_pipeline);
                pass.set_bind_group(0, common, &[]);
                pass.set_bind_group(1, &smooth_groups[self.active_smoothing.active()], &[]);
                pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
            }
            self.active_smoothing.flip();
        }
    }

    /// Final weighted blend into the frame buffer.
    pub fn draw(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let common = self
            .common_bind_group
            .as_ref()
            .expect("ensure_bind_groups must run before draw");
        let draw_groups = self.draw_bind_groups.as_ref().unwrap();

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Illustration Draw Pass"),
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
        pass.set_pipeline(&self.draw_pipeline);
        pass.set_bind_group(0, common, &[]);
        pass.set_bind_group(1, &draw_groups[self.active_smoothing.active()], &[]);
        pass.draw(0..3, 0..1);
    }

    pub(crate) fn active_smoothing_index(&self) -> usize {
        self.active_smoothing.active()
    }

    pub(crate) fn index_buffer(&self) -> &wgpu::Buffer {
        self.index.buffer()
    }

    pub(crate) fn count_buffer(&self) -> &wgpu::Buffer {
        self.count.buffer()
    }

    pub(crate) fn color_buffer(&self) -> &wgpu::Buffer {
        self.color.buffer()
    }

    pub(crate) fn surface_info_buffer(&self) -> &wgpu::Buffer {
        self.surface_info.buffer()
    }

    pub(crate) fn active_smoothing_buffer(&self) -> &wgpu::Buffer {
        self.smoothing[self.active_smoothing.active()].buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_layout_matches_gpu() {
        // Must match the WGSL IllustrationParams struct: 16 + 16 + 16 bytes.
        assert_eq!(std::mem::size_of::<IllustrationParams>(), 48);
    }
}
