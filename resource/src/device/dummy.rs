//! Dummy device for testing and development.
//!
//! This device doesn't touch a GPU. It hands out unique handles, keeps a host
//! copy and a device copy of every allocation so flush and invalidate are
//! observable, counts every create/destroy, and can inject failures.
//!
//! Memory types:
//!
//! | index | flags |
//! |---|---|
//! | 0 | `DEVICE_LOCAL` |
//! | 1 | `HOST_VISIBLE | HOST_COHERENT` |
//! | 2 | `HOST_VISIBLE | HOST_CACHED` (non-coherent) |
//! | 3 | `DEVICE_LOCAL | HOST_VISIBLE | HOST_COHERENT` |
//!
//! Buffers may live in any type; images only in device-local ones.

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ash::vk;
use ash::vk::Handle;
use parking_lot::{Condvar, Mutex};

use crate::config::BlockConfig;
use crate::error::ResourceError;

use super::{AllocationInfo, AllocationRequest, Device, SubPoolHandle};

const BUFFER_ALIGNMENT: u64 = 256;
const IMAGE_ALIGNMENT: u64 = 4096;
const BUFFER_TYPE_BITS: u32 = 0b1111;
const IMAGE_TYPE_BITS: u32 = 0b1001;

/// Counters of native operations issued against a [`DummyDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DummyStats {
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub images_created: usize,
    pub images_destroyed: usize,
    pub views_created: usize,
    pub views_destroyed: usize,
    pub samplers_created: usize,
    pub samplers_destroyed: usize,
    pub fences_created: usize,
    pub fences_destroyed: usize,
    pub sub_pools_created: usize,
    pub sub_pools_destroyed: usize,
    pub allocations: usize,
    pub frees: usize,
    pub flushes: usize,
    pub invalidates: usize,
    pub fence_waits: usize,
    /// Destroy or free calls on handles that were not live.
    pub invalid_destroys: usize,
}

impl DummyStats {
    /// Buffers created and not yet destroyed.
    pub fn live_buffers(&self) -> usize {
        self.buffers_created - self.buffers_destroyed
    }

    /// Images created and not yet destroyed.
    pub fn live_images(&self) -> usize {
        self.images_created - self.images_destroyed
    }

    /// Image views created and not yet destroyed.
    pub fn live_views(&self) -> usize {
        self.views_created - self.views_destroyed
    }

    /// Samplers created and not yet destroyed.
    pub fn live_samplers(&self) -> usize {
        self.samplers_created - self.samplers_destroyed
    }

    /// Allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.allocations - self.frees
    }
}

/// Allocation handed out by a [`DummyDevice`].
#[derive(Debug)]
pub struct DummyAllocation {
    id: u64,
    offset: u64,
    size: u64,
    memory_type_index: u32,
    pool: Option<SubPoolHandle>,
}

#[derive(Debug)]
struct DummyMemory {
    host: Vec<u8>,
    device: Vec<u8>,
    coherent: bool,
    mapped: bool,
}

#[derive(Debug)]
struct DummySubPool {
    memory_type_index: u32,
    capacity: Option<u64>,
    reserved: u64,
    used: u64,
    live: usize,
    live_bytes: u64,
    retired: bool,
}

impl DummySubPool {
    /// Bytes held against the device: the reserved blocks, or the live
    /// allocations once they exceed the reservation.
    fn charged(&self) -> u64 {
        self.reserved.max(self.live_bytes)
    }
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    buffers: HashMap<u64, u64>,
    images: HashMap<u64, u64>,
    views: HashSet<u64>,
    samplers: HashSet<u64>,
    sub_pools: HashMap<u64, DummySubPool>,
    memory: HashMap<u64, DummyMemory>,
    allocated_bytes: u64,
    stats: DummyStats,
}

impl DummyState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove_sub_pool(&mut self, id: u64) {
        if let Some(sub_pool) = self.sub_pools.remove(&id) {
            self.allocated_bytes -= sub_pool.charged();
            self.stats.sub_pools_destroyed += 1;
            log::trace!("DummyDevice: destroying sub-pool {id}");
        }
    }
}

/// Dummy device.
#[derive(Debug)]
pub struct DummyDevice {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    memory_budget: Option<u64>,
    manual_fences: bool,
    fail_image_views: AtomicBool,
    fail_samplers: AtomicBool,
    state: Mutex<DummyState>,
    fences: Mutex<HashMap<u64, bool>>,
    fence_signaled: Condvar,
}

impl DummyDevice {
    /// Create a new dummy device with unlimited memory and self-signalling fences.
    pub fn new() -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 4,
            memory_heap_count: 2,
            ..Default::default()
        };
        let types = [
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                1,
            ),
            (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
                1,
            ),
            (
                vk::MemoryPropertyFlags::DEVICE_LOCAL
                    | vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                0,
            ),
        ];
        for (slot, (flags, heap)) in memory_properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
            slot.heap_index = heap;
        }
        memory_properties.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        memory_properties.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };

        Self {
            memory_properties,
            memory_budget: None,
            manual_fences: false,
            fail_image_views: AtomicBool::new(false),
            fail_samplers: AtomicBool::new(false),
            state: Mutex::new(DummyState::default()),
            fences: Mutex::new(HashMap::new()),
            fence_signaled: Condvar::new(),
        }
    }

    /// Fail allocations once `bytes` are outstanding.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Fences only signal through [`signal_fence`](Self::signal_fence).
    pub fn with_manual_fences(mut self) -> Self {
        self.manual_fences = true;
        self
    }

    /// Make image view creation fail.
    pub fn set_fail_image_views(&self, fail: bool) {
        self.fail_image_views.store(fail, Ordering::Release);
    }

    /// Make sampler creation fail.
    pub fn set_fail_samplers(&self, fail: bool) {
        self.fail_samplers.store(fail, Ordering::Release);
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    /// Bytes currently allocated.
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().allocated_bytes
    }

    /// Number of sub-pools still holding memory, retired ones included.
    pub fn live_sub_pools(&self) -> usize {
        self.state.lock().sub_pools.len()
    }

    /// Signal a fence (for testing/simulation).
    pub fn signal_fence(&self, fence: vk::Fence) {
        let mut fences = self.fences.lock();
        if let Some(signaled) = fences.get_mut(&fence.as_raw()) {
            *signaled = true;
            self.fence_signaled.notify_all();
        }
    }

    /// Whether a fence is signaled (non-blocking).
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.manual_fences_signaled(&self.fences.lock(), &[fence])
    }

    /// Write bytes as if the device produced them, bypassing the host copy
    /// of non-coherent memory.
    pub fn simulate_device_write(&self, allocation: &DummyAllocation, offset: usize, bytes: &[u8]) {
        let mut state = self.state.lock();
        if let Some(memory) = state.memory.get_mut(&allocation.id) {
            let target = if memory.coherent {
                &mut memory.host
            } else {
                &mut memory.device
            };
            target[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Bytes the device currently sees for an allocation.
    pub fn device_contents(&self, allocation: &DummyAllocation) -> Vec<u8> {
        let state = self.state.lock();
        state
            .memory
            .get(&allocation.id)
            .map(|memory| {
                if memory.coherent {
                    memory.host.clone()
                } else {
                    memory.device.clone()
                }
            })
            .unwrap_or_default()
    }

    fn manual_fences_signaled(&self, fences: &HashMap<u64, bool>, wait: &[vk::Fence]) -> bool {
        !self.manual_fences
            || wait
                .iter()
                .all(|fence| fences.get(&fence.as_raw()).copied().unwrap_or(false))
    }

    fn memory_type_flags(&self, index: u32) -> vk::MemoryPropertyFlags {
        self.memory_properties.memory_types[index as usize].property_flags
    }

    fn range(
        allocation: &DummyAllocation,
        offset: u64,
        size: u64,
    ) -> std::ops::Range<usize> {
        let end = offset.saturating_add(size).min(allocation.size);
        offset.min(end) as usize..end as usize
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DummyDevice {
    type Allocation = DummyAllocation;

    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer, ResourceError> {
        if info.size == 0 {
            return Err(ResourceError::ResourceCreationFailed(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let id = state.next_id();
        state.buffers.insert(id, info.size);
        state.stats.buffers_created += 1;
        log::trace!("DummyDevice: creating buffer {id} (size: {})", info.size);
        Ok(vk::Buffer::from_raw(id))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        if state.buffers.remove(&buffer.as_raw()).is_some() {
            state.stats.buffers_destroyed += 1;
            log::trace!("DummyDevice: destroying buffer {}", buffer.as_raw());
        } else {
            state.stats.invalid_destroys += 1;
        }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self
            .state
            .lock()
            .buffers
            .get(&buffer.as_raw())
            .copied()
            .unwrap_or(0);
        vk::MemoryRequirements {
            size: size.next_multiple_of(BUFFER_ALIGNMENT),
            alignment: BUFFER_ALIGNMENT,
            memory_type_bits: BUFFER_TYPE_BITS,
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        allocation: &DummyAllocation,
    ) -> Result<(), ResourceError> {
        let state = self.state.lock();
        if !state.buffers.contains_key(&buffer.as_raw()) || !state.memory.contains_key(&allocation.id)
        {
            return Err(ResourceError::Internal(
                "binding unknown buffer or allocation".to_string(),
            ));
        }
        Ok(())
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image, ResourceError> {
        let extent = info.extent;
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(ResourceError::ResourceCreationFailed(
                "image extent must be non-zero".to_string(),
            ));
        }
        let texel_size: u64 = match info.format {
            vk::Format::R32G32B32A32_SFLOAT => 16,
            vk::Format::R16G16B16A16_SFLOAT => 8,
            _ => 4,
        };
        let size = u64::from(extent.width)
            * u64::from(extent.height)
            * u64::from(extent.depth)
            * u64::from(info.array_layers.max(1))
            * texel_size;

        let mut state = self.state.lock();
        let id = state.next_id();
        state.images.insert(id, size);
        state.stats.images_created += 1;
        log::trace!(
            "DummyDevice: creating image {id} ({}x{}x{})",
            extent.width,
            extent.height,
            extent.depth
        );
        Ok(vk::Image::from_raw(id))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        if state.images.remove(&image.as_raw()).is_some() {
            state.stats.images_destroyed += 1;
            log::trace!("DummyDevice: destroying image {}", image.as_raw());
        } else {
            state.stats.invalid_destroys += 1;
        }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let size = self
            .state
            .lock()
            .images
            .get(&image.as_raw())
            .copied()
            .unwrap_or(0);
        vk::MemoryRequirements {
            size: size.next_multiple_of(IMAGE_ALIGNMENT),
            alignment: IMAGE_ALIGNMENT,
            memory_type_bits: IMAGE_TYPE_BITS,
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        allocation: &DummyAllocation,
    ) -> Result<(), ResourceError> {
        let state = self.state.lock();
        if !state.images.contains_key(&image.as_raw()) || !state.memory.contains_key(&allocation.id) {
            return Err(ResourceError::Internal(
                "binding unknown image or allocation".to_string(),
            ));
        }
        Ok(())
    }

    fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, ResourceError> {
        if self.fail_image_views.load(Ordering::Acquire) {
            return Err(ResourceError::from_vk(
                "create image view",
                vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            ));
        }
        let mut state = self.state.lock();
        if !state.images.contains_key(&info.image.as_raw()) {
            return Err(ResourceError::Internal(
                "view over unknown image".to_string(),
            ));
        }
        let id = state.next_id();
        state.views.insert(id);
        state.stats.views_created += 1;
        log::trace!(
            "DummyDevice: creating view {id} of image {}",
            info.image.as_raw()
        );
        Ok(vk::ImageView::from_raw(id))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        if state.views.remove(&view.as_raw()) {
            state.stats.views_destroyed += 1;
            log::trace!("DummyDevice: destroying view {}", view.as_raw());
        } else {
            state.stats.invalid_destroys += 1;
        }
    }

    fn create_sampler(
        &self,
        info: &vk::SamplerCreateInfo<'_>,
    ) -> Result<vk::Sampler, ResourceError> {
        if self.fail_samplers.load(Ordering::Acquire) {
            return Err(ResourceError::from_vk(
                "create sampler",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        let mut state = self.state.lock();
        let id = state.next_id();
        state.samplers.insert(id);
        state.stats.samplers_created += 1;
        log::trace!(
            "DummyDevice: creating sampler {id} (filter: {:?}, address: {:?})",
            info.mag_filter,
            info.address_mode_u
        );
        Ok(vk::Sampler::from_raw(id))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        let mut state = self.state.lock();
        if state.samplers.remove(&sampler.as_raw()) {
            state.stats.samplers_destroyed += 1;
            log::trace!("DummyDevice: destroying sampler {}", sampler.as_raw());
        } else {
            state.stats.invalid_destroys += 1;
        }
    }

    fn create_sub_pool(
        &self,
        memory_type_index: u32,
        blocks: &BlockConfig,
    ) -> Result<SubPoolHandle, ResourceError> {
        if memory_type_index >= self.memory_properties.memory_type_count {
            return Err(ResourceError::AllocationFailed(format!(
                "memory type {memory_type_index} does not exist"
            )));
        }
        let reserved = blocks
            .block_size
            .saturating_mul(u64::from(blocks.min_block_count));
        let mut state = self.state.lock();
        if let Some(budget) = self.memory_budget {
            if state.allocated_bytes + reserved > budget {
                return Err(ResourceError::OutOfMemory);
            }
        }

        let id = state.next_id();
        state.sub_pools.insert(
            id,
            DummySubPool {
                memory_type_index,
                capacity: blocks.capacity(),
                reserved,
                used: 0,
                live: 0,
                live_bytes: 0,
                retired: false,
            },
        );
        state.allocated_bytes += reserved;
        state.stats.sub_pools_created += 1;
        log::trace!(
            "DummyDevice: creating sub-pool {id} (memory type {memory_type_index}, block size {}, reserved {reserved})",
            blocks.block_size
        );
        Ok(SubPoolHandle::from_raw(id))
    }

    fn destroy_sub_pool(&self, pool: SubPoolHandle) {
        let mut state = self.state.lock();
        let live = match state.sub_pools.get_mut(&pool.as_raw()) {
            Some(sub_pool) if !sub_pool.retired => {
                sub_pool.retired = true;
                sub_pool.live
            }
            _ => {
                state.stats.invalid_destroys += 1;
                return;
            }
        };
        if live == 0 {
            state.remove_sub_pool(pool.as_raw());
        } else {
            log::debug!(
                "DummyDevice: retiring sub-pool {} with {live} live allocations",
                pool.as_raw()
            );
        }
    }

    fn allocate_memory(
        &self,
        requirements: &vk::MemoryRequirements,
        request: &AllocationRequest<'_>,
    ) -> Result<DummyAllocation, ResourceError> {
        let mut state = self.state.lock();
        let size = requirements.size;

        let (memory_type_index, offset, charge) = match request.pool {
            Some(handle) => {
                let sub_pool = state.sub_pools.get(&handle.as_raw()).ok_or_else(|| {
                    ResourceError::AllocationFailed(format!(
                        "unknown sub-pool {}",
                        handle.as_raw()
                    ))
                })?;
                if sub_pool.retired {
                    return Err(ResourceError::AllocationFailed(format!(
                        "sub-pool {} is retired",
                        handle.as_raw()
                    )));
                }
                if requirements.memory_type_bits & (1 << sub_pool.memory_type_index) == 0 {
                    return Err(ResourceError::AllocationFailed(format!(
                        "sub-pool memory type {} not allowed by resource",
                        sub_pool.memory_type_index
                    )));
                }
                let offset = sub_pool
                    .used
                    .next_multiple_of(requirements.alignment.max(1));
                if let Some(capacity) = sub_pool.capacity {
                    if offset + size > capacity {
                        return Err(ResourceError::OutOfMemory);
                    }
                }
                let charge =
                    sub_pool.reserved.max(sub_pool.live_bytes + size) - sub_pool.charged();
                (sub_pool.memory_type_index, offset, charge)
            }
            None => {
                let index = self
                    .find_memory_type_index(requirements.memory_type_bits, &request.memory)
                    .ok_or_else(|| {
                        ResourceError::AllocationFailed(format!(
                            "no memory type for {:?}",
                            request.memory.usage
                        ))
                    })?;
                (index, 0, size)
            }
        };

        if let Some(budget) = self.memory_budget {
            if state.allocated_bytes + charge > budget {
                log::trace!(
                    "DummyDevice: allocation {:?} of {size} bytes exceeds budget",
                    request.name
                );
                return Err(ResourceError::OutOfMemory);
            }
        }
        if let Some(handle) = request.pool {
            if let Some(sub_pool) = state.sub_pools.get_mut(&handle.as_raw()) {
                sub_pool.used = offset + size;
                sub_pool.live += 1;
                sub_pool.live_bytes += size;
            }
        }

        let coherent = self
            .memory_type_flags(memory_type_index)
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        let id = state.next_id();
        state.memory.insert(
            id,
            DummyMemory {
                host: vec![0; size as usize],
                device: vec![0; size as usize],
                coherent,
                mapped: false,
            },
        );
        state.allocated_bytes += charge;
        state.stats.allocations += 1;
        log::trace!(
            "DummyDevice: allocating {:?} ({size} bytes, memory type {memory_type_index})",
            request.name
        );

        Ok(DummyAllocation {
            id,
            offset,
            size,
            memory_type_index,
            pool: request.pool,
        })
    }

    fn free_memory(&self, allocation: DummyAllocation) -> Result<(), ResourceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.memory.remove(&allocation.id).is_none() {
            state.stats.invalid_destroys += 1;
            return Err(ResourceError::Internal(format!(
                "double free of allocation {}",
                allocation.id
            )));
        }
        let pooled = allocation
            .pool
            .and_then(|handle| state.sub_pools.get_mut(&handle.as_raw()));
        match pooled {
            Some(sub_pool) => {
                let before = sub_pool.charged();
                sub_pool.live -= 1;
                sub_pool.live_bytes -= allocation.size;
                if sub_pool.live == 0 {
                    sub_pool.used = 0;
                }
                let released = before - sub_pool.charged();
                let retire = sub_pool.retired && sub_pool.live == 0;
                state.allocated_bytes -= released;
                if let (true, Some(handle)) = (retire, allocation.pool) {
                    state.remove_sub_pool(handle.as_raw());
                }
            }
            None => state.allocated_bytes -= allocation.size,
        }
        state.stats.frees += 1;
        log::trace!("DummyDevice: freeing allocation {}", allocation.id);
        Ok(())
    }

    fn allocation_info(&self, allocation: &DummyAllocation) -> AllocationInfo {
        AllocationInfo {
            offset: allocation.offset,
            size: allocation.size,
            property_flags: self.memory_type_flags(allocation.memory_type_index),
            pool: allocation.pool,
        }
    }

    fn map_memory(&self, allocation: &DummyAllocation) -> Result<NonNull<u8>, ResourceError> {
        if !self
            .memory_type_flags(allocation.memory_type_index)
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(ResourceError::NotHostVisible);
        }
        let mut state = self.state.lock();
        let memory = state
            .memory
            .get_mut(&allocation.id)
            .ok_or_else(|| ResourceError::Internal("mapping freed allocation".to_string()))?;
        memory.mapped = true;
        NonNull::new(memory.host.as_mut_ptr())
            .ok_or_else(|| ResourceError::Internal("empty allocation".to_string()))
    }

    fn unmap_memory(&self, allocation: &DummyAllocation) {
        if let Some(memory) = self.state.lock().memory.get_mut(&allocation.id) {
            memory.mapped = false;
        }
    }

    fn flush_memory(
        &self,
        allocation: &DummyAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        state.stats.flushes += 1;
        let memory = state
            .memory
            .get_mut(&allocation.id)
            .ok_or_else(|| ResourceError::Internal("flushing freed allocation".to_string()))?;
        if !memory.coherent {
            let range = Self::range(allocation, offset, size);
            let DummyMemory { host, device, .. } = memory;
            device[range.clone()].copy_from_slice(&host[range]);
        }
        Ok(())
    }

    fn invalidate_memory(
        &self,
        allocation: &DummyAllocation,
        offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        state.stats.invalidates += 1;
        let memory = state.memory.get_mut(&allocation.id).ok_or_else(|| {
            ResourceError::Internal("invalidating freed allocation".to_string())
        })?;
        if !memory.coherent {
            let range = Self::range(allocation, offset, size);
            let DummyMemory { host, device, .. } = memory;
            host[range.clone()].copy_from_slice(&device[range]);
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, ResourceError> {
        let id = {
            let mut state = self.state.lock();
            state.stats.fences_created += 1;
            state.next_id()
        };
        self.fences.lock().insert(id, signaled);
        log::trace!("DummyDevice: creating fence {id} (signaled: {signaled})");
        Ok(vk::Fence::from_raw(id))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let removed = self.fences.lock().remove(&fence.as_raw()).is_some();
        let mut state = self.state.lock();
        if removed {
            state.stats.fences_destroyed += 1;
            log::trace!("DummyDevice: destroying fence {}", fence.as_raw());
        } else {
            state.stats.invalid_destroys += 1;
        }
    }

    fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        timeout: Option<Duration>,
    ) -> Result<bool, ResourceError> {
        self.state.lock().stats.fence_waits += 1;

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut guard = self.fences.lock();
        loop {
            if self.manual_fences_signaled(&guard, fences) {
                return Ok(true);
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .fence_signaled
                        .wait_until(&mut guard, deadline)
                        .timed_out()
                    {
                        return Ok(self.manual_fences_signaled(&guard, fences));
                    }
                }
                None => self.fence_signaled.wait(&mut guard),
            }
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<(), ResourceError> {
        let mut guard = self.fences.lock();
        for fence in fences {
            match guard.get_mut(&fence.as_raw()) {
                Some(signaled) => *signaled = false,
                None => {
                    return Err(ResourceError::Internal(format!(
                        "resetting unknown fence {}",
                        fence.as_raw()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProperties, MemoryUsage};

    fn buffer_info(size: u64) -> vk::BufferCreateInfo<'static> {
        vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
    }

    #[test]
    fn test_dummy_device_name() {
        assert_eq!(DummyDevice::new().name(), "Dummy");
    }

    #[test]
    fn test_buffer_lifecycle_counts() {
        let device = DummyDevice::new();
        let buffer = device.create_buffer(&buffer_info(100)).unwrap();
        let requirements = device.buffer_memory_requirements(buffer);
        assert_eq!(requirements.size, 256);

        device.destroy_buffer(buffer);
        device.destroy_buffer(buffer);

        let stats = device.stats();
        assert_eq!(stats.live_buffers(), 0);
        assert_eq!(stats.invalid_destroys, 1);
    }

    #[test]
    fn test_memory_budget() {
        let device = DummyDevice::new().with_memory_budget(512);
        let requirements = vk::MemoryRequirements {
            size: 1024,
            alignment: 256,
            memory_type_bits: BUFFER_TYPE_BITS,
        };
        let request = AllocationRequest::buffer("big", MemoryProperties::gpu_only());
        assert_eq!(
            device.allocate_memory(&requirements, &request).unwrap_err(),
            ResourceError::OutOfMemory
        );
        assert_eq!(device.stats().allocations, 0);
    }

    #[test]
    fn test_non_coherent_flush_and_invalidate() {
        let device = DummyDevice::new();
        let requirements = vk::MemoryRequirements {
            size: 256,
            alignment: 256,
            memory_type_bits: BUFFER_TYPE_BITS,
        };
        let request = AllocationRequest::buffer("readback", MemoryProperties::new(MemoryUsage::GpuToCpu));
        let allocation = device.allocate_memory(&requirements, &request).unwrap();
        assert!(!device.allocation_info(&allocation).is_host_coherent());

        let ptr = device.map_memory(&allocation).unwrap();
        unsafe { ptr.as_ptr().write(7) };
        assert_eq!(device.device_contents(&allocation)[0], 0);
        device.flush_memory(&allocation, 0, 256).unwrap();
        assert_eq!(device.device_contents(&allocation)[0], 7);

        device.simulate_device_write(&allocation, 1, &[9]);
        assert_eq!(unsafe { ptr.as_ptr().add(1).read() }, 0);
        device.invalidate_memory(&allocation, 0, 256).unwrap();
        assert_eq!(unsafe { ptr.as_ptr().add(1).read() }, 9);

        device.unmap_memory(&allocation);
        device.free_memory(allocation).unwrap();
    }

    #[test]
    fn test_sub_pool_capacity() {
        let device = DummyDevice::new();
        let pool = device
            .create_sub_pool(1, &BlockConfig::new(1024, 0, 1))
            .unwrap();
        let requirements = vk::MemoryRequirements {
            size: 768,
            alignment: 256,
            memory_type_bits: BUFFER_TYPE_BITS,
        };
        let mut request = AllocationRequest::buffer("pooled", MemoryProperties::cpu_to_gpu());
        request.pool = Some(pool);

        let first = device.allocate_memory(&requirements, &request).unwrap();
        assert_eq!(device.allocation_info(&first).pool, Some(pool));
        assert_eq!(
            device.allocate_memory(&requirements, &request).unwrap_err(),
            ResourceError::OutOfMemory
        );

        device.free_memory(first).unwrap();
        device.destroy_sub_pool(pool);
        assert_eq!(device.live_sub_pools(), 0);
    }

    #[test]
    fn test_retired_sub_pool_outlives_allocations() {
        let device = DummyDevice::new();
        let pool = device
            .create_sub_pool(1, &BlockConfig::new(4096, 0, 0))
            .unwrap();
        let requirements = vk::MemoryRequirements {
            size: 256,
            alignment: 256,
            memory_type_bits: BUFFER_TYPE_BITS,
        };
        let mut request = AllocationRequest::buffer("pooled", MemoryProperties::cpu_to_gpu());
        request.pool = Some(pool);
        let allocation = device.allocate_memory(&requirements, &request).unwrap();

        device.destroy_sub_pool(pool);
        assert_eq!(device.live_sub_pools(), 1);
        assert_eq!(device.stats().sub_pools_destroyed, 0);
        assert!(matches!(
            device.allocate_memory(&requirements, &request).unwrap_err(),
            ResourceError::AllocationFailed(_)
        ));

        device.free_memory(allocation).unwrap();
        assert_eq!(device.live_sub_pools(), 0);
        assert_eq!(device.stats().sub_pools_destroyed, 1);
        assert_eq!(device.allocated_bytes(), 0);

        device.destroy_sub_pool(pool);
        assert_eq!(device.stats().invalid_destroys, 1);
    }

    #[test]
    fn test_sub_pool_reserves_min_blocks() {
        let device = DummyDevice::new().with_memory_budget(4096);
        assert_eq!(
            device
                .create_sub_pool(1, &BlockConfig::new(4096, 2, 0))
                .unwrap_err(),
            ResourceError::OutOfMemory
        );

        let pool = device
            .create_sub_pool(1, &BlockConfig::new(1024, 2, 0))
            .unwrap();
        assert_eq!(device.allocated_bytes(), 2048);

        let requirements = vk::MemoryRequirements {
            size: 1536,
            alignment: 256,
            memory_type_bits: BUFFER_TYPE_BITS,
        };
        let mut request = AllocationRequest::buffer("pooled", MemoryProperties::cpu_to_gpu());
        request.pool = Some(pool);
        let first = device.allocate_memory(&requirements, &request).unwrap();
        assert_eq!(device.allocated_bytes(), 2048);
        let second = device.allocate_memory(&requirements, &request).unwrap();
        assert_eq!(device.allocated_bytes(), 3072);
        assert_eq!(
            device.allocate_memory(&requirements, &request).unwrap_err(),
            ResourceError::OutOfMemory
        );

        device.free_memory(second).unwrap();
        device.free_memory(first).unwrap();
        assert_eq!(device.allocated_bytes(), 2048);
        device.destroy_sub_pool(pool);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn test_fences_auto_signal() {
        let device = DummyDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert!(
            device
                .wait_for_fences(&[fence], Some(Duration::from_millis(1)))
                .unwrap()
        );
        device.destroy_fence(fence);
    }

    #[test]
    fn test_manual_fence_timeout_and_signal() {
        let device = DummyDevice::new().with_manual_fences();
        let fence = device.create_fence(false).unwrap();
        assert!(
            !device
                .wait_for_fences(&[fence], Some(Duration::from_millis(5)))
                .unwrap()
        );

        device.signal_fence(fence);
        assert!(device.is_fence_signaled(fence));
        assert!(device.wait_for_fences(&[fence], None).unwrap());

        device.reset_fences(&[fence]).unwrap();
        assert!(!device.is_fence_signaled(fence));
        device.destroy_fence(fence);
    }

    #[test]
    fn test_fault_injection_toggles() {
        let device = DummyDevice::new();
        device.set_fail_samplers(true);
        assert!(device.create_sampler(&vk::SamplerCreateInfo::default()).is_err());
        device.set_fail_samplers(false);
        assert!(device.create_sampler(&vk::SamplerCreateInfo::default()).is_ok());
    }
}
