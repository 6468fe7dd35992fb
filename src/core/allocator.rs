mod memory;
mod suballocator;

pub use memory::MemoryUse;

use crate::error::RenderError;

use memory::MemoryRegion;
use suballocator::ChunkId;

use anyhow::{Context, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;

/// A memory allocation object, that holds the information
/// necessary to bind a resource to Vulkan memory and to give
/// the memory back later.
#[derive(Clone, Copy, Debug)]
pub struct Allocation {
    /// The Vulkan device memory object the allocation is tied to.
    pub memory: vk::DeviceMemory,
    /// The offset of the allocation within the memory object.
    pub offset: u64,
    memory_type: u32,
    block: usize,
    chunk: ChunkId,
}

/// Memory allocator that manages Vulkan memory and provides
/// functions to allocate and free buffers from it. It is bound
/// to one logical device: created right after it and destroyed
/// right before it.
pub struct Allocator {
    /// One region per memory type supported by the device.
    regions: Vec<MemoryRegion>,
}

impl Allocator {
    pub unsafe fn new(instance: &Instance, physical_device: vk::PhysicalDevice) -> Self {
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let regions = memory_properties.memory_types
            [..memory_properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .map(|(index, memory)| MemoryRegion::new(index as u32, memory.property_flags))
            .collect::<Vec<_>>();

        info!("Allocator created ({} memory types).", regions.len());
        Self { regions }
    }

    /// Creates a buffer and binds it to freshly sub-allocated
    /// memory of the given class.
    pub unsafe fn create_buffer(
        &mut self,
        device: &Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_use: MemoryUse,
    ) -> Result<(vk::Buffer, Allocation)> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = device.create_buffer(&info, None)?;

        match self.bind_buffer(device, buffer, memory_use) {
            Ok(allocation) => Ok((buffer, allocation)),
            Err(error) => {
                device.destroy_buffer(buffer, None);
                Err(error)
            }
        }
    }

    unsafe fn bind_buffer(
        &mut self,
        device: &Device,
        buffer: vk::Buffer,
        memory_use: MemoryUse,
    ) -> Result<Allocation> {
        let requirements = device.get_buffer_memory_requirements(buffer);
        let allocation = self.allocate(device, requirements, memory_use)?;

        let bound = device.bind_buffer_memory(buffer, allocation.memory, allocation.offset);
        if let Err(error) = bound {
            self.free(allocation);
            return Err(error).context("Failed to bind buffer memory");
        }

        Ok(allocation)
    }

    pub unsafe fn allocate(
        &mut self,
        device: &Device,
        requirements: vk::MemoryRequirements,
        memory_use: MemoryUse,
    ) -> Result<Allocation> {
        let types = self.regions.iter().map(|r| r.properties).collect::<Vec<_>>();
        let memory_type = find_memory_type(
            &types,
            requirements.memory_type_bits,
            memory_use.required_properties(),
        )?;

        self.regions[memory_type as usize].allocate(device, requirements)
    }

    /// Gives the allocation's range back to its block. The block
    /// itself stays alive until the allocator is destroyed.
    pub fn free(&mut self, allocation: Allocation) {
        let result = self
            .regions
            .get_mut(allocation.memory_type as usize)
            .map(|region| region.free(allocation.block, allocation.chunk));

        if let Some(Err(error)) = result {
            warn!("Failed to free allocation: {error}");
        }
    }

    /// Maps the allocation into host memory and returns a pointer
    /// to its first byte. Only valid for `CpuToGpu` memory.
    pub unsafe fn map_memory(
        &mut self,
        device: &Device,
        allocation: &Allocation,
    ) -> Result<*mut u8> {
        let region = self
            .regions
            .get_mut(allocation.memory_type as usize)
            .context("Mapping an allocation from an unknown memory type")?;

        let base = region.map(device, allocation.block)?;
        Ok(base.add(allocation.offset as usize))
    }

    pub unsafe fn unmap_memory(&mut self, device: &Device, allocation: &Allocation) {
        if let Some(region) = self.regions.get_mut(allocation.memory_type as usize) {
            region.unmap(device, allocation.block);
        }
    }

    pub unsafe fn destroy_buffer(
        &mut self,
        device: &Device,
        buffer: vk::Buffer,
        allocation: Allocation,
    ) {
        device.destroy_buffer(buffer, None);
        self.free(allocation);
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        let blocks = self.regions.iter().map(|r| r.block_count()).sum::<usize>();
        self.regions.iter_mut().for_each(|r| r.destroy(device));
        info!("Allocator destroyed ({blocks} memory blocks freed).");
    }
}

/// Picks the first memory type allowed by `type_bits` whose
/// properties contain `properties`.
pub fn find_memory_type(
    types: &[vk::MemoryPropertyFlags],
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    // The memory type bits have a bit set for every memory type
    // index that can back the resource.
    types
        .iter()
        .enumerate()
        .find(|(index, flags)| type_bits & (1 << index) != 0 && flags.contains(properties))
        .map(|(index, _)| index as u32)
        .ok_or(RenderError::NoMemoryType(properties))
}

#[cfg(test)]
mod tests {
    use super::*;

    use vk::MemoryPropertyFlags as F;

    fn typical_types() -> Vec<vk::MemoryPropertyFlags> {
        vec![
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT,
            F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED,
        ]
    }

    #[test]
    fn device_local_picks_the_first_match() {
        let types = typical_types();

        assert_eq!(find_memory_type(&types, 0b1111, F::DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn type_bits_restrict_the_candidates() {
        let types = typical_types();
        let host = MemoryUse::CpuToGpu.required_properties();

        assert_eq!(find_memory_type(&types, 0b1111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&types, 0b1100, host).unwrap(), 2);
        assert_eq!(find_memory_type(&types, 0b0100, F::DEVICE_LOCAL).unwrap(), 2);
    }

    #[test]
    fn no_matching_type_is_an_error() {
        let types = typical_types();

        let error = find_memory_type(&types, 0b0001, F::HOST_VISIBLE).unwrap_err();
        assert!(matches!(error, RenderError::NoMemoryType(flags) if flags == F::HOST_VISIBLE));
    }
}
