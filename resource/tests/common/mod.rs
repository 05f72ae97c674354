//! Common utilities for resource integration tests.
//!
//! Tests run on the dummy device, which counts every native call and can
//! inject failures, so leaks and double frees show up in its statistics.

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use redlilium_resource::{
    BlockConfig, BufferDescriptor, DummyDevice, ImageDescriptor, ImageProperties,
    MemoryAllocator, MemoryProperties, PolicyKind, PoolConfig, ResourcePool, SamplerProperties,
};

/// Initialise logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Policy Enumeration
// ============================================================================

/// Suballocation policies exercised by parameterized tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// No policy object.
    None,
    /// Explicit pass-through policy.
    Passthrough,
    /// Linear sub-pools with small blocks.
    Linear,
}

impl Policy {
    /// Convert to a pool configuration.
    pub fn to_config(self) -> PoolConfig {
        let kind = match self {
            Policy::None => PolicyKind::None,
            Policy::Passthrough => PolicyKind::Passthrough,
            Policy::Linear => PolicyKind::Linear(BlockConfig::new(4 << 20, 0, 0)),
        };
        PoolConfig::new().with_reserve(4).with_policy(kind)
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Dummy device plus the pool under test.
pub struct TestContext {
    pub device: Arc<DummyDevice>,
    pub pool: ResourcePool<DummyDevice>,
}

impl TestContext {
    /// Context with self-signalling fences.
    pub fn new(policy: Policy) -> Self {
        Self::with_device(DummyDevice::new(), policy)
    }

    /// Context around a preconfigured device.
    pub fn with_device(device: DummyDevice, policy: Policy) -> Self {
        Self::with_config(device, policy.to_config())
    }

    /// Context with an explicit pool configuration.
    pub fn with_config(device: DummyDevice, config: PoolConfig) -> Self {
        init_logging();
        let device = Arc::new(device);
        let pool = ResourcePool::new(Arc::clone(&device), config);
        Self { device, pool }
    }

    /// Direct-path allocator on the same device.
    pub fn allocator(&self) -> MemoryAllocator<DummyDevice> {
        MemoryAllocator::new(Arc::clone(&self.device))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Host-visible storage buffer descriptor.
pub fn host_buffer(size: u64) -> BufferDescriptor {
    BufferDescriptor::new(
        size,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryProperties::gpu_to_cpu(),
    )
}

/// Device-local storage buffer descriptor.
pub fn device_buffer(size: u64) -> BufferDescriptor {
    BufferDescriptor::new(
        size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryProperties::gpu_only(),
    )
}

/// Small 2D storage image sampled with `sampler`.
pub fn storage_image(sampler: SamplerProperties) -> ImageDescriptor {
    ImageDescriptor::new(
        ImageProperties::new_2d(
            vk::Format::R32G32B32A32_SFLOAT,
            8,
            8,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
        ),
        MemoryProperties::gpu_only(),
    )
    .with_sampler(sampler)
}

/// Deterministic byte pattern.
pub fn generate_test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
