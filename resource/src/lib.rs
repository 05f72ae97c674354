//! # RedLilium Resource
//!
//! GPU resource lifecycle and pooling for compute backends.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Device`] - Native device seam with Vulkan and Dummy (for testing) implementations
//! - [`MemoryAllocator`] - Direct creation path, one allocation per resource
//! - [`Buffer`] / [`Image`] - RAII resources owning their object and memory
//! - [`MemoryMap`] - Scoped host access with flush/invalidate
//! - [`SamplerCache`] - Deduplicated immutable samplers
//! - [`policy`] - Suballocation policies carving sub-pools per memory type
//! - [`ResourcePool`] - Batched creation, deferred release and fence reuse
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_resource::{MemoryAccess, MemoryAllocator, MemoryMap};
//!
//! let allocator = MemoryAllocator::vulkan(&instance, physical_device, &device)?;
//! let staging = allocator.create_staging_buffer(4096)?;
//! {
//!     let mut map = MemoryMap::new(&staging, MemoryAccess::WRITE)?;
//!     map.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod device;
pub mod error;
pub mod memory;
pub mod policy;
pub mod pool;
pub mod profiling;
pub mod resource;
pub mod sampler;
pub mod sync;
pub mod types;

pub use allocator::MemoryAllocator;
pub use config::{AllocatorConfig, BlockConfig, PolicyKind, PoolConfig};
#[cfg(feature = "vulkan-backend")]
pub use device::VulkanDevice;
pub use device::{AllocationInfo, AllocationRequest, Device, DummyDevice, SubPoolHandle};
pub use error::ResourceError;
pub use memory::{MemoryAccess, MemoryMap, MemoryProperties, MemoryUsage};
pub use policy::{AllocationPolicy, LinearPolicy, PassthroughPolicy};
pub use pool::{FenceHandle, PoolStats, PooledBuffer, PooledImage, ResourcePool};
pub use resource::{Buffer, BufferProperties, Image};
pub use sampler::{SamplerCache, SamplerProperties};
pub use sync::Fence;
pub use types::{BufferDescriptor, ImageDescriptor, ImageProperties, ViewProperties};

/// Resource library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
