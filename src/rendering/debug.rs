//! Debug read-back of the OIT buffers.
//!
//! Everything here forces a full GPU stall via blocking buffer maps. It only
//! runs when the `debug` flag of `end_frame` is set and is meant for
//! inspecting small viewports; nothing in this module is on the hot path.
//!
//! Read-back lengths are clamped to `min(count, capacity)` everywhere; a
//! counter above capacity just means fragments were dropped during capture
//! and is reported, not read past the end of the buffer.

use std::fmt::Write as _;

use glam::UVec2;

use crate::error::RenderError;

use super::fragment_lists::{unpack_color10, FragmentListRenderer, FragmentRecord, INVALID_INDEX};

/// Host copy of the base fragment-list state.
pub struct FragmentListDump {
    pub screen_size: UVec2,
    pub capacity: u32,
    /// Fragment count measured by the resolve step (the capture counter).
    pub query_count: u32,
    /// Counter value at read-back time.
    pub counter: u32,
    /// Per-pixel list heads, row-major.
    pub heads: Vec<u32>,
    /// The first `min(counter, capacity)` records.
    pub fragments: Vec<FragmentRecord>,
}

/// Host copy of the illustration-buffer state. All fragment-indexed vectors
/// hold `min(query_count, capacity)` entries.
pub struct IllustrationDump {
    pub screen_size: UVec2,
    pub capacity: u32,
    /// Per-pixel block start, row-major; `INVALID_INDEX` when empty.
    pub index: Vec<u32>,
    /// Per-pixel block length, row-major.
    pub count: Vec<u32>,
    /// alpha + bitcast packed rgb.
    pub color: Vec<[f32; 2]>,
    /// depth + gradient.
    pub surface_info: Vec<[f32; 2]>,
    /// Four neighbor fragment indices, -1 = none.
    pub neighbors: Vec<[i32; 4]>,
    /// beta + gamma from the active smoothing buffer.
    pub smoothing: Vec<[f32; 2]>,
}

/// Copy `size` bytes of `buffer` to a fresh staging buffer and block-map it.
fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    size: u64,
    label: &'static str,
) -> Result<Vec<u8>, RenderError> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(wgpu::COPY_BUFFER_ALIGNMENT),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("OIT Debug Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..size.max(wgpu::COPY_BUFFER_ALIGNMENT));
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
        Ok(Err(source)) => return Err(RenderError::BufferMap { label, source }),
        Err(_) => return Err(RenderError::ReadbackLost { label }),
    }

    let data = slice.get_mapped_range()[..size as usize].to_vec();
    staging.unmap();
    Ok(data)
}

/// Fragment-record count that is safe to read back.
fn clamped_len(count: u32, capacity: u32) -> u32 {
    if count > capacity {
        log::warn!(
            "debug readback: counter {} exceeds capacity {}, fragments were dropped",
            count,
            capacity
        );
    }
    count.min(capacity)
}

pub(crate) fn read_fragment_lists(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    renderer: &FragmentListRenderer,
    query_count: u32,
) -> Result<FragmentListDump, RenderError> {
    let screen_size = renderer.screen_size();
    let capacity = renderer.fragment_capacity();
    let cells = u64::from(screen_size.x) * u64::from(screen_size.y);

    let counter_bytes = read_buffer(device, queue, renderer.counter_buffer(), 4, "counter dump")?;
    let counter = *bytemuck::from_bytes::<u32>(&counter_bytes);

    let heads_bytes = read_buffer(
        device,
        queue,
        renderer.heads_buffer(),
        cells * 4,
        "head dump",
    )?;

    let records = clamped_len(counter, capacity);
    let fragment_bytes = read_buffer(
        device,
        queue,
        renderer.fragments_buffer(),
        u64::from(records) * std::mem::size_of::<FragmentRecord>() as u64,
        "fragment dump",
    )?;

    Ok(FragmentListDump {
        screen_size,
        capacity,
        query_count,
        counter,
        heads: bytemuck::pod_collect_to_vec(&heads_bytes),
        fragments: bytemuck::pod_collect_to_vec(&fragment_bytes),
    })
}

pub(crate) fn read_illustration_buffers(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    renderer: &FragmentListRenderer,
    query_count: u32,
) -> Result<IllustrationDump, RenderError> {
    let screen_size = renderer.screen_size();
    let capacity = renderer.fragment_capacity();
    let cells = u64::from(screen_size.x) * u64::from(screen_size.y);
    let illustration = renderer.illustration();

    let records = u64::from(clamped_len(query_count, capacity));

    let index_bytes = read_buffer(
        device,
        queue,
        illustration.index_buffer(),
        cells * 4,
        "block index dump",
    )?;
    let count_bytes = read_buffer(
        device,
        queue,
        illustration.count_buffer(),
        cells * 4,
        "block count dump",
    )?;
    let color_bytes = read_buffer(
        device,
        queue,
        illustration.color_buffer(),
        records * 8,
        "color dump",
    )?;
    let surface_bytes = read_buffer(
        device,
        queue,
        illustration.surface_info_buffer(),
        records * 8,
        "surface info dump",
    )?;
    let neighbor_bytes = read_buffer(
        device,
        queue,
        renderer.fragments_buffer(),
        records * 16,
        "neighbor dump",
    )?;
    let smoothing_bytes = read_buffer(
        device,
        queue,
        illustration.active_smoothing_buffer(),
        records * 8,
        "smoothing dump",
    )?;

    Ok(IllustrationDump {
        screen_size,
        capacity,
        index: bytemuck::pod_collect_to_vec(&index_bytes),
        count: bytemuck::pod_collect_to_vec(&count_bytes),
        color: bytemuck::pod_collect_to_vec(&color_bytes),
        surface_info: bytemuck::pod_collect_to_vec(&surface_bytes),
        neighbors: bytemuck::pod_collect_to_vec(&neighbor_bytes),
        smoothing: bytemuck::pod_collect_to_vec(&smoothing_bytes),
    })
}

/// Render the per-pixel chains and raw records as text.
pub fn fmt_fragment_lists(dump: &FragmentListDump) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "========= Fragment List Renderer - DEBUG =========");
    let _ = writeln!(
        out,
        "fragment query: {}, global counter: {}, capacity: {}",
        dump.query_count, dump.counter, dump.capacity
    );

    let _ = writeln!(out, "per-pixel chains:");
    for y in 0..dump.screen_size.y {
        for x in 0..dump.screen_size.x {
            let cell = (y * dump.screen_size.x + x) as usize;
            let mut node = dump.heads[cell];
            if node == INVALID_INDEX {
                continue;
            }
            let _ = write!(out, "  {:>4}:{:<4} ", x, y);
            // The chain cannot be longer than the record list; anything past
            // that is a corrupt link.
            let mut remaining = dump.fragments.len();
            loop {
                if node == INVALID_INDEX {
                    break;
                }
                let Some(frag) = dump.fragments.get(node as usize) else {
                    let _ = write!(out, "{} (out of range)", node);
                    break;
                };
                let _ = write!(out, "{}", node);
                node = frag.previous;
                if node != INVALID_INDEX {
                    let _ = write!(out, " -> ");
                }
                if remaining == 0 {
                    let _ = write!(out, " (cycle)");
                    break;
                }
                remaining -= 1;
            }
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "fragment storage:");
    for (i, frag) in dump.fragments.iter().enumerate() {
        let rgb = unpack_color10(frag.color);
        let _ = writeln!(
            out,
            "  {:>5}: previous={:>10}, depth={:>6.3}, alpha={:>5.3}, r={:.3}, g={:.3}, b={:.3}",
            i, frag.previous as i64, frag.depth, frag.alpha, rgb.x, rgb.y, rgb.z
        );
    }

    let _ = writeln!(out, "==================================================");
    out
}

/// Render the sorted blocks, including neighbor linkage, as text.
pub fn fmt_illustration_buffers(dump: &IllustrationDump) -> String {
    let size = dump.color.len();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "========= Fragment List Renderer - DEBUG Illustration Buffers ========="
    );

    for y in 0..dump.screen_size.y {
        for x in 0..dump.screen_size.x {
            let cell = (y * dump.screen_size.x + x) as usize;
            let start = dump.index[cell];
            let count = dump.count[cell];
            if count == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "  {:>4}:{:<4} start={:>6}, count={:>4}",
                x, y, start as i64, count
            );
            for i in 0..count {
                let Some(index) = (start as usize).checked_add(i as usize).filter(|k| *k < size)
                else {
                    let _ = writeln!(out, "     (block exceeds read-back range)");
                    break;
                };
                let [alpha, packed] = dump.color[index];
                let [depth, gradient] = dump.surface_info[index];
                let [beta, gamma] = dump.smoothing[index];
                let rgb = unpack_color10(packed.to_bits());
                let _ = write!(
                    out,
                    "     depth={:>6.3}, gradient={:>6.3}, alpha={:>5.3}, r={:.3}, g={:.3}, \
                     b={:.3}, beta={:>5.3}, gamma={:>5.3}, neighbors:",
                    depth, gradient, alpha, rgb.x, rgb.y, rgb.z, beta, gamma
                );
                for neighbor in dump.neighbors[index] {
                    if neighbor < 0 {
                        let _ = write!(out, "(-1)");
                    } else if (neighbor as usize) < size {
                        let _ = write!(
                            out,
                            "({}:{:.3})",
                            neighbor, dump.surface_info[neighbor as usize][0]
                        );
                    } else {
                        let _ = write!(out, "(>size)");
                    }
                }
                let _ = writeln!(out);
            }
        }
    }

    let _ = writeln!(out, "==================================================");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::fragment_lists::pack_color10;
    use glam::Vec3;

    fn record(previous: u32, depth: f32, alpha: f32, rgb: Vec3) -> FragmentRecord {
        FragmentRecord {
            previous,
            depth,
            alpha,
            color: pack_color10(rgb),
        }
    }

    #[test]
    fn fragment_chain_is_walked_newest_first() {
        // Two fragments at pixel (1, 0): record 1 was captured last, so the
        // head points at it and its `previous` points at record 0.
        let dump = FragmentListDump {
            screen_size: UVec2::new(2, 1),
            capacity: 1024,
            query_count: 2,
            counter: 2,
            heads: vec![INVALID_INDEX, 1],
            fragments: vec![
                record(INVALID_INDEX, 0.25, 0.5, Vec3::new(1.0, 0.0, 0.0)),
                record(0, 0.75, 0.25, Vec3::new(0.0, 1.0, 0.0)),
            ],
        };
        let text = fmt_fragment_lists(&dump);
        assert!(text.contains("1 -> 0"), "chain missing from:\n{text}");
        assert!(text.contains("fragment query: 2, global counter: 2"));
        // The empty pixel produces no chain line.
        assert!(!text.contains("   0:0"));
    }

    #[test]
    fn dangling_link_is_reported_not_followed() {
        let dump = FragmentListDump {
            screen_size: UVec2::new(1, 1),
            capacity: 4,
            query_count: 1,
            counter: 1,
            heads: vec![7],
            fragments: vec![record(INVALID_INDEX, 0.5, 1.0, Vec3::ONE)],
        };
        let text = fmt_fragment_lists(&dump);
        assert!(text.contains("7 (out of range)"));
    }

    #[test]
    fn clamped_len_limits_over_capacity_counters() {
        let _ = env_logger::builder().is_test(true).try_init();

        assert_eq!(clamped_len(3, 1024), 3);
        assert_eq!(clamped_len(2000, 1024), 1024);
    }

    #[test]
    fn illustration_block_formatting_marks_missing_neighbors() {
        // One pixel with a two-fragment block; the second fragment links
        // back to the first, plus one deliberately out-of-range link.
        let dump = IllustrationDump {
            screen_size: UVec2::new(1, 1),
            capacity: 1024,
            index: vec![0],
            count: vec![2],
            color: vec![
                [0.5, f32::from_bits(pack_color10(Vec3::new(1.0, 0.0, 0.0)))],
                [0.25, f32::from_bits(pack_color10(Vec3::new(0.0, 0.0, 1.0)))],
            ],
            surface_info: vec![[0.25, 0.0], [0.75, 0.1]],
            neighbors: vec![[-1, -1, -1, -1], [0, -1, 99, -1]],
            smoothing: vec![[1.0, 0.0], [0.0, 1.0]],
        };
        let text = fmt_illustration_buffers(&dump);
        assert!(text.contains("start=     0, count=   2"));
        assert!(text.contains("(0:0.250)"), "linked neighbor missing:\n{text}");
        assert!(text.contains("(>size)"));
        assert!(text.contains("(-1)"));
    }
}
