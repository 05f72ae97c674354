//! Vulkan device using ash and gpu-allocator.
//!
//! Top-level memory comes from one `gpu_allocator` allocator. Each sub-pool
//! requested by a suballocation policy is a separate allocator whose blocks
//! are sized from the policy configuration and whose requests are restricted
//! to a single memory type.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, AllocationSizes, MemoryLocation};
use parking_lot::Mutex;

use crate::config::BlockConfig;
use crate::error::ResourceError;
use crate::memory::{self, MemoryProperties, MemoryUsage};

use super::{AllocationInfo, AllocationRequest, Device, SubPoolHandle};

/// Memory allocation owned by a [`VulkanDevice`].
#[derive(Debug)]
pub struct VulkanAllocation {
    inner: Allocation,
    pool: Option<SubPoolHandle>,
}

struct SubPool {
    allocator: Allocator,
    memory_type_index: u32,
    capacity: Option<u64>,
    used: u64,
    live: usize,
    retired: bool,
}

/// Vulkan device.
pub struct VulkanDevice {
    sub_pools: Mutex<HashMap<u64, SubPool>>,
    allocator: Mutex<Allocator>,
    next_pool_id: AtomicU64,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    non_coherent_atom_size: u64,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("physical_device", &self.physical_device)
            .field("device", &self.device.handle())
            .field("sub_pools", &self.sub_pools.lock().len())
            .finish()
    }
}

impl VulkanDevice {
    /// Wrap an existing logical device.
    ///
    /// # Panics
    ///
    /// Panics if any of the handles is null.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Self, ResourceError> {
        assert!(
            instance.handle() != vk::Instance::null(),
            "Invalid Vulkan instance!"
        );
        assert!(
            physical_device != vk::PhysicalDevice::null(),
            "Invalid Vulkan physical device!"
        );
        assert!(
            device.handle() != vk::Device::null(),
            "Invalid Vulkan device!"
        );

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;

        let allocator = Self::create_allocator(
            instance,
            physical_device,
            device,
            AllocationSizes::default(),
        )?;

        log::debug!(
            "VulkanDevice: created allocator ({} memory types, atom size {})",
            memory_properties.memory_type_count,
            limits.non_coherent_atom_size
        );

        Ok(Self {
            sub_pools: Mutex::new(HashMap::new()),
            allocator: Mutex::new(allocator),
            next_pool_id: AtomicU64::new(1),
            instance: instance.clone(),
            physical_device,
            device: device.clone(),
            memory_properties,
            non_coherent_atom_size: limits.non_coherent_atom_size.max(1),
        })
    }

    /// The wrapped logical device.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        allocation_sizes: AllocationSizes,
    ) -> Result<Allocator, ResourceError> {
        Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes,
        })
        .map_err(|e| {
            ResourceError::InitializationFailed(format!("Failed to create memory allocator: {e}"))
        })
    }

    fn location(usage: MemoryUsage) -> MemoryLocation {
        match usage {
            MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
            MemoryUsage::GpuToCpu => MemoryLocation::GpuToCpu,
            MemoryUsage::CpuOnly | MemoryUsage::CpuToGpu | MemoryUsage::CpuCopy => {
                MemoryLocation::CpuToGpu
            }
        }
    }

    fn map_allocation_error(error: AllocationError) -> ResourceError {
        match error {
            AllocationError::OutOfMemory => ResourceError::OutOfMemory,
            other => ResourceError::AllocationFailed(other.to_string()),
        }
    }

    fn mapped_range(
        &self,
        allocation: &VulkanAllocation,
        offset: u64,
        size: u64,
    ) -> vk::MappedMemoryRange<'static> {
        let atom = self.non_coherent_atom_size;
        let start = allocation.inner.offset() + offset;
        let end = start + size.min(allocation.inner.size().saturating_sub(offset));
        let block_end = allocation.inner.offset() + allocation.inner.size();
        let (offset, size) = atom_aligned_range(start, end, block_end, atom);
        vk::MappedMemoryRange::default()
            .memory(unsafe { allocation.inner.memory() })
            .offset(offset)
            .size(size)
    }
}

/// Atom-aligned `(offset, size)` covering `[start, end)`.
///
/// The memory object may end inside the last atom, so a range rounded past
/// `allocation_end` runs to the end of the memory instead.
fn atom_aligned_range(start: u64, end: u64, allocation_end: u64, atom: u64) -> (u64, u64) {
    let aligned_start = start - start % atom;
    let aligned_end = end.next_multiple_of(atom);
    if aligned_end > allocation_end {
        (aligned_start, vk::WHOLE_SIZE)
    } else {
        (aligned_start, aligned_end - aligned_start)
    }
}

impl Device for VulkanDevice {
    type Allocation = VulkanAllocation;

    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn find_memory_type_index(&self, type_bits: u32, memory: &MemoryProperties) -> Option<u32> {
        // gpu-allocator only serves host-visible requests from coherent memory.
        let memory = if memory.usage.is_host_visible() {
            memory.with_required(vk::MemoryPropertyFlags::HOST_COHERENT)
        } else {
            *memory
        };
        memory::find_memory_type_index(&self.memory_properties, type_bits, &memory)
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer, ResourceError> {
        unsafe { self.device.create_buffer(info, None) }
            .map_err(|e| ResourceError::from_vk("Failed to create buffer", e))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        allocation: &VulkanAllocation,
    ) -> Result<(), ResourceError> {
        unsafe {
            self.device.bind_buffer_memory(
                buffer,
                allocation.inner.memory(),
                allocation.inner.offset(),
            )
        }
        .map_err(|e| ResourceError::from_vk("Failed to bind buffer memory", e))
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image, ResourceError> {
        unsafe { self.device.create_image(info, None) }
            .map_err(|e| ResourceError::from_vk("Failed to create image", e))
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        allocation: &VulkanAllocation,
    ) -> Result<(), ResourceError> {
        unsafe {
            self.device.bind_image_memory(
                image,
                allocation.inner.memory(),
                allocation.inner.offset(),
            )
        }
        .map_err(|e| ResourceError::from_vk("Failed to bind image memory", e))
    }

    fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, ResourceError> {
        unsafe { self.device.create_image_view(info, None) }
            .map_err(|e| ResourceError::from_vk("Failed to create image view", e))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(
        &self,
        info: &vk::SamplerCreateInfo<'_>,
    ) -> Result<vk::Sampler, ResourceError> {
        unsafe { self.device.create_sampler(info, None) }
            .map_err(|e| ResourceError::from_vk("Failed to create sampler", e))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_sub_pool(
        &self,
        memory_type_index: u32,
        blocks: &BlockConfig,
    ) -> Result<SubPoolHandle, ResourceError> {
        let allocator = Self::create_allocator(
            &self.instance,
            self.physical_device,
            &self.device,
            AllocationSizes::new(blocks.block_size, blocks.block_size),
        )?;
        let id = self.next_pool_id.fetch_add(1, Ordering::Relaxed);
        self.sub_pools.lock().insert(
            id,
            SubPool {
                allocator,
                memory_type_index,
                capacity: blocks.capacity(),
                used: 0,
                live: 0,
                retired: false,
            },
        );
        Ok(SubPoolHandle::from_raw(id))
    }

    fn destroy_sub_pool(&self, pool: SubPoolHandle) {
        let mut sub_pools = self.sub_pools.lock();
        let live = match sub_pools.get_mut(&pool.as_raw()) {
            Some(sub_pool) if !sub_pool.retired => {
                sub_pool.retired = true;
                sub_pool.live
            }
            _ => {
                log::error!("VulkanDevice: destroying unknown sub-pool {}", pool.as_raw());
                return;
            }
        };
        // Dropping the allocator frees its device memory blocks.
        if live == 0 {
            sub_pools.remove(&pool.as_raw());
        } else {
            log::debug!(
                "VulkanDevice: retiring sub-pool {} with {live} live allocations",
                pool.as_raw()
            );
        }
    }

    fn allocate_memory(
        &self,
        requirements: &vk::MemoryRequirements,
        request: &AllocationRequest<'_>,
    ) -> Result<VulkanAllocation, ResourceError> {
        let location = Self::location(request.memory.usage);
        let Some(handle) = request.pool else {
            let inner = self
                .allocator
                .lock()
                .allocate(&AllocationCreateDesc {
                    name: request.name,
                    requirements: *requirements,
                    location,
                    linear: request.linear,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(Self::map_allocation_error)?;
            return Ok(VulkanAllocation { inner, pool: None });
        };

        let mut sub_pools = self.sub_pools.lock();
        let sub_pool = sub_pools.get_mut(&handle.as_raw()).ok_or_else(|| {
            ResourceError::AllocationFailed(format!("unknown sub-pool {}", handle.as_raw()))
        })?;
        if sub_pool.retired {
            return Err(ResourceError::AllocationFailed(format!(
                "sub-pool {} is retired",
                handle.as_raw()
            )));
        }
        if let Some(capacity) = sub_pool.capacity {
            if sub_pool.used + requirements.size > capacity {
                return Err(ResourceError::OutOfMemory);
            }
        }

        let mut requirements = *requirements;
        requirements.memory_type_bits &= 1 << sub_pool.memory_type_index;
        if requirements.memory_type_bits == 0 {
            return Err(ResourceError::AllocationFailed(format!(
                "sub-pool memory type {} not allowed by resource",
                sub_pool.memory_type_index
            )));
        }

        let inner = sub_pool
            .allocator
            .allocate(&AllocationCreateDesc {
                name: request.name,
                requirements,
                location,
                linear: request.linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(Self::map_allocation_error)?;
        sub_pool.used += inner.size();
        sub_pool.live += 1;
        Ok(VulkanAllocation {
            inner,
            pool: Some(handle),
        })
    }

    fn free_memory(&self, allocation: VulkanAllocation) -> Result<(), ResourceError> {
        let VulkanAllocation { inner, pool } = allocation;
        let size = inner.size();
        match pool {
            None => self.allocator.lock().free(inner),
            Some(handle) => {
                let mut sub_pools = self.sub_pools.lock();
                let sub_pool = sub_pools.get_mut(&handle.as_raw()).ok_or_else(|| {
                    ResourceError::Internal(format!(
                        "allocation outlived its sub-pool {}",
                        handle.as_raw()
                    ))
                })?;
                sub_pool.used = sub_pool.used.saturating_sub(size);
                sub_pool.live -= 1;
                let freed = sub_pool.allocator.free(inner);
                if sub_pool.retired && sub_pool.live == 0 {
                    sub_pools.remove(&handle.as_raw());
                }
                freed
            }
        }
        .map_err(|e| ResourceError::Internal(format!("Failed to free memory: {e}")))
    }

    fn allocation_info(&self, allocation: &VulkanAllocation) -> AllocationInfo {
        AllocationInfo {
            offset: allocation.inner.offset(),
            size: allocation.inner.size(),
            property_flags: allocation.inner.memory_properties(),
            pool: allocation.pool,
        }
    }

    fn map_memory(&self, allocation: &VulkanAllocation) -> Result<NonNull<u8>, ResourceError> {
        // Host-visible memory is persistently mapped by gpu-allocator.
        allocation
            .inner
            .mapped_ptr()
            .map(NonNull::cast)
            .ok_or(ResourceError::NotHostVisible)
    }

    fn unmap_memory(&self, _allocation: &VulkanAllocation) {}

    fn flush_memory(
        &self,
        allocation: &VulkanAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        if allocation
            .inner
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }
        let range = self.mapped_range(allocation, offset, size);
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }
            .map_err(|e| ResourceError::from_vk("Failed to flush mapped memory", e))
    }

    fn invalidate_memory(
        &self,
        allocation: &VulkanAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        if allocation
            .inner
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }
        let range = self.mapped_range(allocation, offset, size);
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }
            .map_err(|e| ResourceError::from_vk("Failed to invalidate mapped memory", e))
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, ResourceError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
            .map_err(|e| ResourceError::from_vk("Failed to create fence", e))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        timeout: Option<Duration>,
    ) -> Result<bool, ResourceError> {
        if fences.is_empty() {
            return Ok(true);
        }
        let timeout_ns = timeout.map_or(u64::MAX, |timeout| {
            u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
        });
        match unsafe { self.device.wait_for_fences(fences, true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(ResourceError::from_vk("Fence wait failed", e)),
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<(), ResourceError> {
        if fences.is_empty() {
            return Ok(());
        }
        unsafe { self.device.reset_fences(fences) }
            .map_err(|e| ResourceError::from_vk("Failed to reset fences", e))
    }
}

static_assertions::assert_impl_all!(VulkanDevice: Send, Sync);
static_assertions::assert_impl_all!(VulkanAllocation: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_aligned_range_inside_allocation() {
        assert_eq!(atom_aligned_range(256, 300, 1024, 64), (256, 64));
        assert_eq!(atom_aligned_range(70, 130, 1024, 64), (64, 128));
    }

    #[test]
    fn test_atom_aligned_range_at_allocation_tail() {
        // Allocation [0, 100) with a 64-byte atom: rounding up would pass 100.
        assert_eq!(atom_aligned_range(0, 100, 100, 64), (0, vk::WHOLE_SIZE));
        assert_eq!(atom_aligned_range(64, 128, 128, 64), (64, 64));
    }
}
