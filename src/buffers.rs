use crate::{
    commands::{begin_single_command, end_single_command},
    core::allocator::{Allocation, Allocator, MemoryUse},
};

use std::ptr::copy_nonoverlapping as memcpy;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

/// A buffer together with the memory backing it.
#[derive(Clone, Copy, Debug)]
pub struct Buffer {
    pub handle: vk::Buffer,
    pub allocation: Allocation,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub unsafe fn create(
        device: &Device,
        allocator: &mut Allocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_use: MemoryUse,
    ) -> Result<Self> {
        let (handle, allocation) = allocator.create_buffer(device, size, usage, memory_use)?;
        Ok(Self { handle, allocation, size })
    }

    pub unsafe fn destroy(self, device: &Device, allocator: &mut Allocator) {
        allocator.destroy_buffer(device, self.handle, self.allocation);
    }
}

/// Size in bytes of a slice, as a device size.
pub fn byte_size<T>(data: &[T]) -> vk::DeviceSize {
    std::mem::size_of_val(data) as vk::DeviceSize
}

/// Copies `data` byte for byte to `destination`, which must point
/// to at least `size_of_val(data)` writable bytes.
pub unsafe fn copy_to_mapped<T: Copy>(data: &[T], destination: *mut u8) {
    memcpy(data.as_ptr().cast::<u8>(), destination, std::mem::size_of_val(data));
}

/// Queue and pool used for one-off transfer commands.
#[derive(Clone, Copy, Debug)]
pub struct TransferContext {
    pub pool: vk::CommandPool,
    pub queue: vk::Queue,
}

/// Uploads `data` to a new device-local buffer. The data goes
/// through a host-visible staging buffer first, since device
/// local memory is not necessarily visible to the host. The
/// staging buffer is gone when this returns.
pub unsafe fn upload_buffer<T: Copy>(
    device: &Device,
    allocator: &mut Allocator,
    transfer: TransferContext,
    data: &[T],
    usage: vk::BufferUsageFlags,
) -> Result<Buffer> {
    let size = byte_size(data);

    let staging = Buffer::create(
        device,
        allocator,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryUse::CpuToGpu,
    )?;

    let result = stage_and_copy(device, allocator, transfer, &staging, data, usage);
    staging.destroy(device, allocator);

    let buffer = result?;
    debug!("Uploaded {size} bytes to a device local buffer ({usage:?}).");
    Ok(buffer)
}

unsafe fn stage_and_copy<T: Copy>(
    device: &Device,
    allocator: &mut Allocator,
    transfer: TransferContext,
    staging: &Buffer,
    data: &[T],
    usage: vk::BufferUsageFlags,
) -> Result<Buffer> {
    let memory = allocator.map_memory(device, &staging.allocation)?;
    copy_to_mapped(data, memory);
    allocator.unmap_memory(device, &staging.allocation);

    let buffer = Buffer::create(
        device,
        allocator,
        staging.size,
        vk::BufferUsageFlags::TRANSFER_DST | usage,
        MemoryUse::GpuOnly,
    )?;

    if let Err(error) = copy_buffer(device, transfer, staging.handle, buffer.handle, staging.size) {
        buffer.destroy(device, allocator);
        return Err(error);
    }

    Ok(buffer)
}

pub unsafe fn copy_buffer(
    device: &Device,
    transfer: TransferContext,
    source: vk::Buffer,
    destination: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let command_buffer = begin_single_command(device, transfer.pool)?;

    let region = vk::BufferCopy::builder().size(size);
    device.cmd_copy_buffer(command_buffer, source, destination, &[region]);

    end_single_command(device, transfer.pool, transfer.queue, command_buffer)
}

/// A host-visible buffer that stays mapped for its whole life.
/// Memory is coherent, so writes need no flush.
pub struct UniformBuffer {
    pub buffer: Buffer,
    mapped: *mut u8,
}

impl UniformBuffer {
    pub unsafe fn create(
        device: &Device,
        allocator: &mut Allocator,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let buffer = Buffer::create(
            device,
            allocator,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUse::CpuToGpu,
        )?;

        match allocator.map_memory(device, &buffer.allocation) {
            Ok(mapped) => Ok(Self { buffer, mapped }),
            Err(error) => {
                buffer.destroy(device, allocator);
                Err(error)
            }
        }
    }

    /// Overwrites the start of the buffer with `value`. The frame
    /// slot owning this buffer must not be in flight.
    pub unsafe fn write<T: Copy>(&self, value: &T) {
        debug_assert!(std::mem::size_of::<T>() as u64 <= self.buffer.size);
        copy_to_mapped(std::slice::from_ref(value), self.mapped);
    }

    pub unsafe fn destroy(self, device: &Device, allocator: &mut Allocator) {
        allocator.unmap_memory(device, &self.buffer.allocation);
        self.buffer.destroy(device, allocator);
    }
}
