//! Native device seam.
//!
//! Every native call the resource layer issues goes through the [`Device`]
//! trait. Two implementations exist:
//!
//! - [`VulkanDevice`]: ash + gpu-allocator (feature `vulkan-backend`)
//! - [`DummyDevice`]: in-memory simulation used by tests and tooling

mod dummy;
#[cfg(feature = "vulkan-backend")]
mod vulkan;

pub use dummy::{DummyAllocation, DummyDevice, DummyStats};
#[cfg(feature = "vulkan-backend")]
pub use vulkan::{VulkanAllocation, VulkanDevice};

use std::fmt::Debug;
use std::ptr::NonNull;
use std::time::Duration;

use ash::vk;

use crate::config::BlockConfig;
use crate::error::ResourceError;
use crate::memory::{self, MemoryProperties};

/// Opaque handle of a device sub-pool created for a suballocation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubPoolHandle(u64);

impl SubPoolHandle {
    /// Wrap a raw device-defined identifier.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// A memory allocation request, possibly steered into a sub-pool by a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest<'a> {
    /// Debug name of the allocation.
    pub name: &'a str,
    /// Memory placement.
    pub memory: MemoryProperties,
    /// Whether the resource is linear (buffers) or tiled (optimal images).
    pub linear: bool,
    /// Sub-pool to allocate from instead of the top-level allocator.
    pub pool: Option<SubPoolHandle>,
}

impl<'a> AllocationRequest<'a> {
    /// Request for a buffer.
    pub fn buffer(name: &'a str, memory: MemoryProperties) -> Self {
        Self {
            name,
            memory,
            linear: true,
            pool: None,
        }
    }

    /// Request for an optimally tiled image.
    pub fn image(name: &'a str, memory: MemoryProperties) -> Self {
        Self {
            name,
            memory,
            linear: false,
            pool: None,
        }
    }
}

/// Placement of a live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Offset inside the backing device memory block.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
    /// Property flags of the chosen memory type.
    pub property_flags: vk::MemoryPropertyFlags,
    /// Sub-pool the allocation came from.
    pub pool: Option<SubPoolHandle>,
}

impl AllocationInfo {
    /// Whether the host can map this allocation.
    pub fn is_host_visible(&self) -> bool {
        self.property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Whether flush/invalidate are unnecessary for this allocation.
    pub fn is_host_coherent(&self) -> bool {
        self.property_flags
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }
}

/// Native device operations used by the resource layer.
///
/// Handles are ash's `vk` handle types regardless of implementation. Destroy
/// calls receive handles previously returned by the matching create call and
/// are never passed null handles.
pub trait Device: Send + Sync + 'static {
    /// Backing memory allocation type.
    type Allocation: Debug + Send + Sync + 'static;

    /// Device name for logging.
    fn name(&self) -> &'static str;

    /// Memory types and heaps of the physical device.
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;

    /// Memory type that would serve `memory` for a resource allowing `type_bits`.
    fn find_memory_type_index(&self, type_bits: u32, memory: &MemoryProperties) -> Option<u32> {
        memory::find_memory_type_index(self.memory_properties(), type_bits, memory)
    }

    // Buffers
    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer, ResourceError>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        allocation: &Self::Allocation,
    ) -> Result<(), ResourceError>;

    // Images
    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image, ResourceError>;
    fn destroy_image(&self, image: vk::Image);
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        allocation: &Self::Allocation,
    ) -> Result<(), ResourceError>;
    fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, ResourceError>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // Samplers
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>)
    -> Result<vk::Sampler, ResourceError>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Memory
    /// Create a sub-pool restricted to one memory type.
    fn create_sub_pool(
        &self,
        memory_type_index: u32,
        blocks: &BlockConfig,
    ) -> Result<SubPoolHandle, ResourceError>;
    /// Retire a sub-pool.
    ///
    /// A retired sub-pool serves no new allocations. Its memory is released
    /// once the last allocation from it is freed, immediately if none is live.
    fn destroy_sub_pool(&self, pool: SubPoolHandle);
    fn allocate_memory(
        &self,
        requirements: &vk::MemoryRequirements,
        request: &AllocationRequest<'_>,
    ) -> Result<Self::Allocation, ResourceError>;
    fn free_memory(&self, allocation: Self::Allocation) -> Result<(), ResourceError>;
    fn allocation_info(&self, allocation: &Self::Allocation) -> AllocationInfo;

    // Host access
    /// Pointer to the first byte of a host-visible allocation.
    fn map_memory(&self, allocation: &Self::Allocation) -> Result<NonNull<u8>, ResourceError>;
    fn unmap_memory(&self, allocation: &Self::Allocation);
    /// Make host writes in `[offset, offset + size)` visible to the device.
    fn flush_memory(
        &self,
        allocation: &Self::Allocation,
        offset: u64,
        size: u64,
    ) -> Result<(), ResourceError>;
    /// Make device writes in `[offset, offset + size)` visible to the host.
    fn invalidate_memory(
        &self,
        allocation: &Self::Allocation,
        offset: u64,
        size: u64,
    ) -> Result<(), ResourceError>;

    // Fences
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, ResourceError>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Wait for all `fences`. `None` waits indefinitely.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        timeout: Option<Duration>,
    ) -> Result<bool, ResourceError>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<(), ResourceError>;
}
