//! GPU buffer management for one allocation.
//!
//! Every storage buffer is sized from a single particle capacity; the whole
//! set is created together and destroyed together when dropped. Handles
//! CPU->GPU upload and GPU->CPU readback.

use std::mem::size_of;

use glam::Vec2;
use wgpu::util::DeviceExt;

use crate::backend::{HashParams, IntegrateParams, OffsetParams, SolveParams};
use crate::error::BackendError;
use crate::neighbor::{self, sort, BucketRange, Proxy};

/// Smallest buffer we ever create (wgpu rejects zero-sized bindings).
const MIN_BUF_SIZE: u64 = 16;

/// Per-stage uniform of the bitonic shader.
/// Must match `SortStage` in `bitonic.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SortStageUniform {
    pub k: u32,
    pub j: u32,
    pub padded: u32,
    pub _pad: u32,
}

/// All device buffers for `capacity` particles.
pub struct GpuBuffers {
    pub capacity: usize,
    pub padded: u32,
    pub key_space: u32,

    // Particle state
    pub positions: wgpu::Buffer,
    pub velocities: wgpu::Buffer,

    // Per-step scratch
    pub densities: wgpu::Buffer,
    pub pressures: wgpu::Buffer,
    pub accelerations: wgpu::Buffer,
    pub proxies: wgpu::Buffer,
    pub offsets: wgpu::Buffer,

    // Stage uniforms
    pub hash_params: wgpu::Buffer,
    pub offset_params: wgpu::Buffer,
    pub solve_params: wgpu::Buffer,
    pub integrate_params: wgpu::Buffer,

    /// One `SortStageUniform` per network stage, `sort_stride` bytes apart.
    pub sort_stages: wgpu::Buffer,
    pub sort_stage_count: u32,
    pub sort_stride: u32,
}

fn storage_buf(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn uniform_buf<T>(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (size_of::<T>() as u64).max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Create a staging (MAP_READ) buffer for readback.
fn create_staging_buf(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Pack the bitonic stage sequence for `padded` elements at `stride`-byte
/// intervals, ready for dynamic-offset binding.
fn pack_sort_stages(padded: u32, stride: u32) -> (Vec<u8>, u32) {
    let stages = sort::bitonic_stages(padded as usize);
    let count = stages.len().max(1);
    let mut bytes = vec![0u8; count * stride as usize];
    for (i, stage) in stages.iter().enumerate() {
        let uniform = SortStageUniform {
            k: stage.k,
            j: stage.j,
            padded,
            _pad: 0,
        };
        let at = i * stride as usize;
        bytes[at..at + size_of::<SortStageUniform>()].copy_from_slice(bytemuck::bytes_of(&uniform));
    }
    (bytes, stages.len() as u32)
}

impl GpuBuffers {
    /// Create every buffer for `capacity` particles. `uniform_alignment` is
    /// the device's `min_uniform_buffer_offset_alignment`.
    pub fn new(device: &wgpu::Device, capacity: usize, uniform_alignment: u32) -> Self {
        let capacity = capacity.max(1);
        let padded = neighbor::padded_len(capacity) as u32;
        let key_space = neighbor::key_space(capacity);
        let cap = capacity as u64;

        let sort_stride = (size_of::<SortStageUniform>() as u32).next_multiple_of(uniform_alignment.max(1));
        let (stage_bytes, sort_stage_count) = pack_sort_stages(padded, sort_stride);
        let sort_stages = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort_stages"),
            contents: &stage_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let vec2 = size_of::<Vec2>() as u64;
        Self {
            capacity,
            padded,
            key_space,
            positions: storage_buf(device, "positions", cap * vec2),
            velocities: storage_buf(device, "velocities", cap * vec2),
            densities: storage_buf(device, "densities", cap * 4),
            pressures: storage_buf(device, "pressures", cap * 4),
            accelerations: storage_buf(device, "accelerations", cap * vec2),
            proxies: storage_buf(device, "proxies", padded as u64 * size_of::<Proxy>() as u64),
            offsets: storage_buf(
                device,
                "offsets",
                key_space as u64 * size_of::<BucketRange>() as u64,
            ),
            hash_params: uniform_buf::<HashParams>(device, "hash_params"),
            offset_params: uniform_buf::<OffsetParams>(device, "offset_params"),
            solve_params: uniform_buf::<SolveParams>(device, "solve_params"),
            integrate_params: uniform_buf::<IntegrateParams>(device, "integrate_params"),
            sort_stages,
            sort_stage_count,
            sort_stride,
        }
    }

    /// Write live positions and velocities.
    pub fn upload(&self, queue: &wgpu::Queue, positions: &[Vec2], velocities: &[Vec2]) {
        if positions.is_empty() {
            return;
        }
        queue.write_buffer(&self.positions, 0, bytemuck::cast_slice(positions));
        queue.write_buffer(&self.velocities, 0, bytemuck::cast_slice(velocities));
    }
}

impl Drop for GpuBuffers {
    fn drop(&mut self) {
        for buffer in [
            &self.positions,
            &self.velocities,
            &self.densities,
            &self.pressures,
            &self.accelerations,
            &self.proxies,
            &self.offsets,
            &self.hash_params,
            &self.offset_params,
            &self.solve_params,
            &self.integrate_params,
            &self.sort_stages,
        ] {
            buffer.destroy();
        }
        tracing::trace!(capacity = self.capacity, "gpu buffers released");
    }
}

/// Copy the first `count` elements of `source` to the host, blocking until
/// the copy has landed.
pub fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, BackendError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let byte_len = (count * size_of::<T>()) as u64;
    let staging = create_staging_buf(device, "readback_staging", byte_len);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, byte_len);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..byte_len);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| BackendError::Readback(e.to_string()))?
        .map_err(|e| BackendError::Readback(e.to_string()))?;

    let data = slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data)[..count].to_vec();
    drop(data);
    staging.unmap();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_stages_are_strided() {
        let (bytes, count) = pack_sort_stages(8, 256);
        assert_eq!(count, 6);
        assert_eq!(bytes.len(), 6 * 256);
        let second: SortStageUniform = bytemuck::pod_read_unaligned(&bytes[256..256 + 16]);
        assert_eq!((second.k, second.j, second.padded), (4, 2, 8));
    }

    #[test]
    fn single_slot_still_gets_a_stage_slot() {
        let (bytes, count) = pack_sort_stages(1, 256);
        assert_eq!(count, 0);
        assert_eq!(bytes.len(), 256);
    }
}
