//! Device allocator: the direct creation path.
//!
//! Each call creates one resource with its own allocation from the device's
//! top-level allocator. Every resource keeps an `Arc` of the device, so the
//! allocator behind it outlives all of them.

use std::sync::Arc;

use ash::vk;

use crate::config::AllocatorConfig;
use crate::device::Device;
use crate::error::ResourceError;
use crate::memory::{MemoryProperties, MemoryUsage};
use crate::resource::{self, Buffer, Image};
use crate::sampler::{SamplerCache, SamplerProperties};
use crate::sync::Fence;
use crate::types::{BufferDescriptor, ImageDescriptor, ImageProperties, ViewProperties};

/// Device-scoped allocator handing out individually allocated resources.
pub struct MemoryAllocator<D: Device> {
    device: Arc<D>,
    config: AllocatorConfig,
}

impl<D: Device> MemoryAllocator<D> {
    /// Create an allocator with the default configuration.
    pub fn new(device: Arc<D>) -> Self {
        Self::with_config(device, AllocatorConfig::default())
    }

    /// Create an allocator with an explicit configuration.
    pub fn with_config(device: Arc<D>, config: AllocatorConfig) -> Self {
        Self { device, config }
    }

    /// The device resources are created on.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// The allocator configuration.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Create a buffer of exactly `size` bytes with its own memory.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory: MemoryProperties,
    ) -> Result<Buffer<D>, ResourceError> {
        resource::create_buffer(
            &self.device,
            &BufferDescriptor::new(size, usage, memory),
            None,
        )
    }

    /// Create an image with its own memory and a view over all of it.
    ///
    /// `sampler` is referenced, not owned; it usually comes from a
    /// [`SamplerCache`].
    pub fn create_image(
        &self,
        memory: MemoryProperties,
        image: ImageProperties,
        view: ViewProperties,
        sampler_properties: SamplerProperties,
        initial_layout: vk::ImageLayout,
        sampler: vk::Sampler,
    ) -> Result<Image<D>, ResourceError> {
        let descriptor = ImageDescriptor {
            label: None,
            image,
            view,
            sampler: sampler_properties,
            memory,
            initial_layout,
        };
        resource::create_image(&self.device, &descriptor, sampler, None)
    }

    /// Storage buffer usable as a transfer source and destination.
    ///
    /// Device-local when `gpu_only`, otherwise host-readable memory
    /// preferring coherent types.
    pub fn create_storage_buffer(
        &self,
        size: u64,
        gpu_only: bool,
    ) -> Result<Buffer<D>, ResourceError> {
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;
        let memory = if gpu_only {
            MemoryProperties::gpu_only()
        } else {
            MemoryProperties::gpu_to_cpu().with_preferred(vk::MemoryPropertyFlags::HOST_COHERENT)
        };
        self.create_buffer(size, usage, memory)
    }

    /// Host staging buffer for copies.
    pub fn create_staging_buffer(&self, size: u64) -> Result<Buffer<D>, ResourceError> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryProperties::new(MemoryUsage::CpuCopy),
        )
    }

    /// Device-local 3D float image with RGBA channels.
    ///
    /// Channels are 16-bit floats when
    /// [`AllocatorConfig::half_precision_images`] is set, 32-bit otherwise.
    pub fn create_image3d_fp(
        &self,
        extent: vk::Extent3D,
        sampler_properties: SamplerProperties,
        sampler: vk::Sampler,
        allow_transfer: bool,
    ) -> Result<Image<D>, ResourceError> {
        let format = if self.config.half_precision_images {
            vk::Format::R16G16B16A16_SFLOAT
        } else {
            vk::Format::R32G32B32A32_SFLOAT
        };
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE;
        if allow_transfer {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }

        self.create_image(
            MemoryProperties::gpu_only(),
            ImageProperties::new_3d(format, extent, usage),
            ViewProperties::new(vk::ImageViewType::TYPE_3D, format),
            sampler_properties,
            vk::ImageLayout::UNDEFINED,
            sampler,
        )
    }

    /// A sampler cache on the same device.
    pub fn create_sampler_cache(&self) -> SamplerCache<D> {
        SamplerCache::new(Arc::clone(&self.device))
    }

    /// A standalone fence on the same device.
    pub fn create_fence(&self) -> Result<Fence<D>, ResourceError> {
        Fence::new(Arc::clone(&self.device))
    }
}

#[cfg(feature = "vulkan-backend")]
impl MemoryAllocator<crate::device::VulkanDevice> {
    /// Create an allocator for an existing Vulkan device.
    ///
    /// # Panics
    ///
    /// Panics if any of the handles is null.
    pub fn vulkan(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Self, ResourceError> {
        let device = crate::device::VulkanDevice::new(instance, physical_device, device)?;
        Ok(Self::new(Arc::new(device)))
    }
}

impl<D: Device> std::fmt::Debug for MemoryAllocator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("device", &self.device.name())
            .field("config", &self.config)
            .finish()
    }
}

static_assertions::assert_impl_all!(MemoryAllocator<crate::device::DummyDevice>: Send, Sync);
