use super::suballocator::{align_up, AllocError, ChunkId, SubAllocator};
use super::Allocation;

use anyhow::{Context, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;

/// How a memory resource will be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryUse {
    /// Resource that is only used by the GPU. Corresponds to
    /// the `DEVICE_LOCAL` flag.
    GpuOnly,
    /// Resource that is written by the CPU and read by the GPU.
    /// Corresponds to `HOST_VISIBLE | HOST_COHERENT`, so that no
    /// explicit flush is needed after writing.
    CpuToGpu,
}

impl MemoryUse {
    pub fn required_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryUse::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUse::CpuToGpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// Range passed to `map_memory` to map a block as a whole.
pub const MAP_WHOLE_BLOCK: vk::DeviceSize = vk::WHOLE_SIZE as vk::DeviceSize;

/// Blocks are allocated 64 MiB at a time.
pub const MEM_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Size of the block to allocate for a request that did not fit
/// in any existing block. Oversize requests get a dedicated
/// block of their own.
pub fn block_size_for(size: u64, alignment: u64) -> u64 {
    MEM_BLOCK_SIZE.max(align_up(size, alignment.max(1)))
}

/// One contiguous `vk::DeviceMemory` allocation, sub-allocated
/// into chunks.
pub struct MemoryBlock {
    memory: vk::DeviceMemory,
    chunks: SubAllocator,
    /// Number of outstanding `map` calls. The block is mapped as
    /// a whole while this is non-zero.
    map_count: u32,
    mapped: *mut u8,
}

impl MemoryBlock {
    unsafe fn new(device: &Device, size: u64, memory_type: u32) -> Result<Self> {
        // Buffer device addresses are enabled on the device, so
        // every block is allocated with the matching flag.
        let mut flags_info = vk::MemoryAllocateFlagsInfo::builder()
            .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);

        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type)
            .push_next(&mut flags_info);

        let memory = device
            .allocate_memory(&info, None)
            .with_context(|| format!("Failed to allocate {size} bytes of device memory"))?;

        debug!("Allocated memory block of {size} bytes (type {memory_type}).");
        Ok(Self {
            memory,
            chunks: SubAllocator::new(size),
            map_count: 0,
            mapped: std::ptr::null_mut(),
        })
    }

    unsafe fn destroy(&mut self, device: &Device) {
        if self.map_count > 0 {
            device.unmap_memory(self.memory);
            self.map_count = 0;
        }
        device.free_memory(self.memory, None);
    }
}

/// Pool of blocks for a single Vulkan memory type.
pub struct MemoryRegion {
    blocks: Vec<MemoryBlock>,
    pub memory_type: u32,
    pub properties: vk::MemoryPropertyFlags,
}

impl MemoryRegion {
    pub fn new(memory_type: u32, properties: vk::MemoryPropertyFlags) -> Self {
        Self {
            blocks: Vec::new(),
            memory_type,
            properties,
        }
    }

    pub unsafe fn allocate(
        &mut self,
        device: &Device,
        requirements: vk::MemoryRequirements,
    ) -> Result<Allocation> {
        let size = requirements.size;
        let alignment = requirements.alignment;

        // First fit over the existing blocks, then a fresh block
        // when all of them are exhausted.
        let found = self
            .blocks
            .iter_mut()
            .enumerate()
            .find_map(|(index, block)| {
                block.chunks.allocate(size, alignment).ok().map(|r| (index, r))
            });

        let (block, (chunk, offset)) = match found {
            Some(found) => found,
            None => {
                let block_size = block_size_for(size, alignment);
                let mut block = MemoryBlock::new(device, block_size, self.memory_type)?;
                let result = match block.chunks.allocate(size, alignment) {
                    Ok(result) => result,
                    Err(error) => {
                        block.destroy(device);
                        return Err(error.into());
                    }
                };
                self.blocks.push(block);
                (self.blocks.len() - 1, result)
            }
        };

        Ok(Allocation {
            memory: self.blocks[block].memory,
            offset,
            memory_type: self.memory_type,
            block,
            chunk,
        })
    }

    pub fn free(&mut self, block: usize, chunk: ChunkId) -> Result<(), AllocError> {
        match self.blocks.get_mut(block) {
            Some(block) => block.chunks.free(chunk),
            None => Err(AllocError::UnknownChunk(chunk)),
        }
    }

    pub unsafe fn map(&mut self, device: &Device, block: usize) -> Result<*mut u8> {
        let block = self
            .blocks
            .get_mut(block)
            .context("Mapping an allocation from an unknown block")?;

        if block.map_count == 0 {
            block.mapped = device
                .map_memory(block.memory, 0, MAP_WHOLE_BLOCK, vk::MemoryMapFlags::empty())
                .context("Failed to map memory block")?
                .cast();
        }
        block.map_count += 1;

        Ok(block.mapped)
    }

    pub unsafe fn unmap(&mut self, device: &Device, block: usize) {
        if let Some(block) = self.blocks.get_mut(block) {
            match block.map_count {
                0 => warn!("Unmapping a memory block that is not mapped."),
                1 => {
                    device.unmap_memory(block.memory);
                    block.mapped = std::ptr::null_mut();
                    block.map_count = 0;
                }
                _ => block.map_count -= 1,
            }
        }
    }

    /// Frees every block. Allocations still alive are reported,
    /// since their buffers now point at freed memory.
    pub unsafe fn destroy(&mut self, device: &Device) {
        for block in &mut self.blocks {
            if !block.chunks.is_empty() {
                warn!(
                    "Freeing memory block with {} of {} bytes still allocated (type {}).",
                    block.chunks.allocated(),
                    block.chunks.size(),
                    self.memory_type
                );
            }
            block.destroy(device);
        }
        self.blocks.clear();
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_requests_share_the_default_block_size() {
        assert_eq!(block_size_for(256, 16), MEM_BLOCK_SIZE);
        assert_eq!(block_size_for(MEM_BLOCK_SIZE, 256), MEM_BLOCK_SIZE);
    }

    #[test]
    fn oversize_requests_get_a_dedicated_block() {
        let size = MEM_BLOCK_SIZE + 1;
        assert_eq!(block_size_for(size, 4096), MEM_BLOCK_SIZE + 4096);
    }

    #[test]
    fn whole_block_mapping_uses_the_vulkan_sentinel() {
        assert_eq!(MAP_WHOLE_BLOCK, u64::MAX);
    }

    #[test]
    fn host_memory_is_coherent() {
        let flags = MemoryUse::CpuToGpu.required_properties();

        assert!(flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert_eq!(
            MemoryUse::GpuOnly.required_properties(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
    }
}
