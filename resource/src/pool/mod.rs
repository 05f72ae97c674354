//! Resource pool: batched creation, deferred bulk release and fence reuse.
//!
//! Work submitted against pooled resources signals a fence taken from the
//! pool. [`ResourcePool::purge`] waits for every submitted fence and only then
//! releases the registered buffers and images, so memory is never returned
//! while in-flight work may still reference it.
//!
//! # Example
//!
//! ```ignore
//! let mut pool = ResourcePool::new(device, PoolConfig::new().with_linear_policy(BlockConfig::default()));
//!
//! let buffer = pool.create_buffer(&BufferDescriptor::new(4096, usage, MemoryProperties::cpu_to_gpu()))?;
//! let buffer = pool.register_buffer_cleanup(buffer);
//!
//! let fence = pool.fence()?;
//! submit(pool.buffer(buffer).unwrap().handle(), fence.submit_handle());
//!
//! pool.purge()?; // waits for the fence, then releases the buffer
//! ```

mod fence;
mod release;

pub use fence::FenceHandle;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::device::Device;
use crate::error::ResourceError;
use crate::policy::{self, AllocationPolicy};
use crate::resource::{self, Buffer, Image};
use crate::sampler::SamplerCache;
use crate::types::{BufferDescriptor, ImageDescriptor};

use fence::FenceSlots;
use release::ReleaseList;

/// Handle of a buffer registered with [`ResourcePool::register_buffer_cleanup`].
///
/// Resolves to `None` once the pool has been purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PooledBuffer {
    index: usize,
    epoch: u64,
}

/// Handle of an image registered with [`ResourcePool::register_image_cleanup`].
///
/// Resolves to `None` once the pool has been purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PooledImage {
    index: usize,
    epoch: u64,
}

/// Occupancy snapshot of a [`ResourcePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub pending_buffers: usize,
    pub pending_images: usize,
    pub fence_slots: usize,
    pub fences_in_use: usize,
    pub waiting_fences: usize,
    pub cached_samplers: usize,
    pub sub_pools: usize,
}

/// Batch-path resource pool.
///
/// The pool requires external serialization; only sampler retrieval and
/// fence handles are safe to use from several threads.
pub struct ResourcePool<D: Device> {
    // Drop order: resources, then samplers, then the policy's sub-pools.
    buffers: ReleaseList<Buffer<D>>,
    images: ReleaseList<Image<D>>,
    samplers: Option<SamplerCache<D>>,
    policy: Option<Box<dyn AllocationPolicy<D>>>,
    fences: Arc<Mutex<FenceSlots>>,
    epoch: u64,
    device: Option<Arc<D>>,
}

impl<D: Device> ResourcePool<D> {
    /// Create a pool with the policy named by `config`.
    pub fn new(device: Arc<D>, config: PoolConfig) -> Self {
        let policy = policy::from_kind(config.policy);
        Self::with_policy(device, config, policy)
    }

    /// Create a pool with an explicit policy object.
    pub fn with_policy(
        device: Arc<D>,
        config: PoolConfig,
        policy: Option<Box<dyn AllocationPolicy<D>>>,
    ) -> Self {
        log::debug!(
            "ResourcePool: created on {} (reserve {}, policy {})",
            device.name(),
            config.reserve,
            policy.as_ref().map_or("none", |policy| policy.name())
        );
        Self {
            buffers: ReleaseList::with_capacity(config.reserve),
            images: ReleaseList::with_capacity(config.reserve),
            samplers: Some(SamplerCache::new(Arc::clone(&device))),
            policy,
            fences: Arc::new(Mutex::new(FenceSlots::with_capacity(config.reserve))),
            epoch: 0,
            device: Some(device),
        }
    }

    /// Whether the pool can still be used.
    pub fn is_valid(&self) -> bool {
        self.device.is_some()
    }

    /// The pool's device.
    ///
    /// # Panics
    ///
    /// Panics if the pool was taken from.
    pub fn device(&self) -> &Arc<D> {
        match &self.device {
            Some(device) => device,
            None => panic!(
                "This resource pool is in an invalid state! \
                 Potential reason: This resource pool was taken from."
            ),
        }
    }

    /// The pool's sampler cache.
    pub fn samplers(&self) -> &SamplerCache<D> {
        self.device();
        match &self.samplers {
            Some(samplers) => samplers,
            None => unreachable!("a valid pool always has a sampler cache"),
        }
    }

    /// Create a buffer through the pool's policy.
    ///
    /// The buffer is not tracked until passed to
    /// [`register_buffer_cleanup`](Self::register_buffer_cleanup).
    pub fn create_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
    ) -> Result<Buffer<D>, ResourceError> {
        let device = Arc::clone(self.device());
        resource::create_buffer(&device, descriptor, self.policy.as_mut())
    }

    /// Create an image through the pool's policy, sampling with a cached sampler.
    ///
    /// The image is not tracked until passed to
    /// [`register_image_cleanup`](Self::register_image_cleanup).
    pub fn create_image(&mut self, descriptor: &ImageDescriptor) -> Result<Image<D>, ResourceError> {
        let device = Arc::clone(self.device());
        let sampler = self.samplers().retrieve(&descriptor.sampler)?;
        resource::create_image(&device, descriptor, sampler, self.policy.as_mut())
    }

    /// Hand a buffer over for release at the next purge.
    pub fn register_buffer_cleanup(&mut self, buffer: Buffer<D>) -> PooledBuffer {
        self.device();
        let index = self.buffers.push(buffer, Buffer::<D>::release);
        PooledBuffer {
            index,
            epoch: self.epoch,
        }
    }

    /// Hand an image over for release at the next purge.
    pub fn register_image_cleanup(&mut self, image: Image<D>) -> PooledImage {
        self.device();
        let index = self.images.push(image, Image::<D>::release);
        PooledImage {
            index,
            epoch: self.epoch,
        }
    }

    /// A registered buffer, unless purged since registration.
    pub fn buffer(&self, handle: PooledBuffer) -> Option<&Buffer<D>> {
        (handle.epoch == self.epoch)
            .then(|| self.buffers.get(handle.index))
            .flatten()
    }

    /// A registered image, unless purged since registration.
    pub fn image(&self, handle: PooledImage) -> Option<&Image<D>> {
        (handle.epoch == self.epoch)
            .then(|| self.images.get(handle.index))
            .flatten()
    }

    /// A registered image for layout updates, unless purged since registration.
    pub fn image_mut(&mut self, handle: PooledImage) -> Option<&mut Image<D>> {
        if handle.epoch != self.epoch {
            return None;
        }
        self.images.get_mut(handle.index)
    }

    /// Take a fence slot, reusing an idle one or creating a new fence.
    pub fn fence(&mut self) -> Result<FenceHandle<D>, ResourceError> {
        let device = Arc::clone(self.device());
        let mut slots = self.fences.lock();
        let index = slots.acquire(&*device)?;
        let epoch = slots.epoch();
        drop(slots);
        Ok(FenceHandle::new(device, Arc::clone(&self.fences), index, epoch))
    }

    /// Wait for all submitted fences, then release every registered resource.
    ///
    /// Blocks without timeout. Afterwards every fence slot is free and handles
    /// from before the purge no longer resolve.
    pub fn purge(&mut self) -> Result<(), ResourceError> {
        crate::profile_scope!("ResourcePool::purge");
        let device = Arc::clone(self.device());

        self.fences.lock().recycle(&*device)?;

        let images = self.images.drain();
        let buffers = self.buffers.drain();
        self.epoch += 1;

        log::debug!("ResourcePool: purged {buffers} buffers and {images} images");
        crate::profile_plot!("ResourcePool released buffers", buffers);
        crate::profile_plot!("ResourcePool released images", images);
        Ok(())
    }

    /// Move the pool's contents into a new pool, invalidating this one.
    ///
    /// Any later use of this pool except dropping it panics.
    pub fn take(&mut self) -> Self {
        self.device();
        Self {
            buffers: std::mem::take(&mut self.buffers),
            images: std::mem::take(&mut self.images),
            samplers: self.samplers.take(),
            policy: self.policy.take(),
            fences: std::mem::take(&mut self.fences),
            epoch: self.epoch,
            device: self.device.take(),
        }
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let slots = self.fences.lock();
        PoolStats {
            pending_buffers: self.buffers.len(),
            pending_images: self.images.len(),
            fence_slots: slots.len(),
            fences_in_use: slots.in_use(),
            waiting_fences: slots.waiting(),
            cached_samplers: self.samplers.as_ref().map_or(0, SamplerCache::len),
            sub_pools: self
                .policy
                .as_ref()
                .map_or(0, |policy| policy.sub_pool_count()),
        }
    }
}

impl<D: Device> Drop for ResourcePool<D> {
    fn drop(&mut self) {
        let Some(device) = self.device.clone() else {
            return;
        };
        if let Err(e) = self.purge() {
            log::warn!("ResourcePool: purge during teardown failed: {}", e);
        }
        self.fences.lock().destroy(&*device);
    }
}

impl<D: Device> std::fmt::Debug for ResourcePool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("valid", &self.is_valid())
            .field("epoch", &self.epoch)
            .field("stats", &self.stats())
            .finish()
    }
}

static_assertions::assert_impl_all!(ResourcePool<crate::device::DummyDevice>: Send);
static_assertions::assert_impl_all!(FenceHandle<crate::device::DummyDevice>: Send, Sync);

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::config::BlockConfig;
    use crate::device::DummyDevice;
    use crate::memory::MemoryProperties;

    fn buffer_descriptor() -> BufferDescriptor {
        BufferDescriptor::new(
            1024,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryProperties::cpu_to_gpu(),
        )
    }

    #[test]
    fn test_created_resources_are_not_tracked() {
        let device = Arc::new(DummyDevice::new());
        let mut pool = ResourcePool::new(Arc::clone(&device), PoolConfig::new());

        let buffer = pool.create_buffer(&buffer_descriptor()).unwrap();
        assert_eq!(pool.stats().pending_buffers, 0);

        let handle = pool.register_buffer_cleanup(buffer);
        assert_eq!(pool.stats().pending_buffers, 1);
        assert!(pool.buffer(handle).is_some());
    }

    #[test]
    fn test_purge_releases_and_invalidates_handles() {
        let device = Arc::new(DummyDevice::new());
        let mut pool = ResourcePool::new(Arc::clone(&device), PoolConfig::new());

        let buffer = pool.create_buffer(&buffer_descriptor()).unwrap();
        let handle = pool.register_buffer_cleanup(buffer);
        pool.purge().unwrap();

        assert!(pool.buffer(handle).is_none());
        assert_eq!(device.stats().live_buffers(), 0);
        assert_eq!(device.stats().live_allocations(), 0);
    }

    #[test]
    fn test_linear_policy_pool_reports_sub_pools() {
        let device = Arc::new(DummyDevice::new());
        let config = PoolConfig::new().with_linear_policy(BlockConfig::new(1 << 20, 0, 0));
        let mut pool = ResourcePool::new(Arc::clone(&device), config);

        let buffer = pool.create_buffer(&buffer_descriptor()).unwrap();
        let info = device.allocation_info(buffer.allocation().unwrap());
        assert!(info.pool.is_some());
        pool.register_buffer_cleanup(buffer);
        assert_eq!(pool.stats().sub_pools, 1);

        drop(pool);
        assert_eq!(device.live_sub_pools(), 0);
        assert_eq!(device.stats().live_allocations(), 0);
    }

    #[test]
    fn test_take_moves_contents() {
        let device = Arc::new(DummyDevice::new());
        let mut pool = ResourcePool::new(Arc::clone(&device), PoolConfig::new());
        let buffer = pool.create_buffer(&buffer_descriptor()).unwrap();
        pool.register_buffer_cleanup(buffer);

        let taken = pool.take();
        assert!(!pool.is_valid());
        assert!(taken.is_valid());
        assert_eq!(taken.stats().pending_buffers, 1);

        drop(pool);
        assert_eq!(device.stats().live_buffers(), 1);
        drop(taken);
        assert_eq!(device.stats().live_buffers(), 0);
    }

    #[test]
    #[should_panic(expected = "invalid state")]
    fn test_taken_pool_panics() {
        let device = Arc::new(DummyDevice::new());
        let mut pool = ResourcePool::new(device, PoolConfig::new());
        let _taken = pool.take();
        let _ = pool.fence();
    }
}
