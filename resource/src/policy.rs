//! Suballocation policies.
//!
//! A policy steers an allocation request before memory is allocated. The
//! [`LinearPolicy`] groups resources of the same memory type into one
//! pre-sized sub-pool per type, so many small resources share a few large
//! device memory blocks. [`PassthroughPolicy`] leaves every request to the
//! top-level allocator.

use std::sync::Arc;

use ash::vk;

use crate::config::{BlockConfig, PolicyKind};
use crate::device::{AllocationRequest, Device, SubPoolHandle};
use crate::error::ResourceError;

/// Steers allocation requests given the memory requirements of a resource.
pub trait AllocationPolicy<D: Device>: Send {
    /// Policy name for logging.
    fn name(&self) -> &'static str;

    /// Adjust `request` for a resource with `requirements`.
    fn enact(
        &mut self,
        device: &Arc<D>,
        requirements: &vk::MemoryRequirements,
        request: &mut AllocationRequest<'_>,
    ) -> Result<(), ResourceError>;

    /// Number of device sub-pools this policy owns.
    fn sub_pool_count(&self) -> usize {
        0
    }
}

/// Boxed linear policy.
pub fn linear<D: Device>(blocks: BlockConfig) -> Box<dyn AllocationPolicy<D>> {
    Box::new(LinearPolicy::new(blocks))
}

/// Boxed pass-through policy.
pub fn passthrough<D: Device>() -> Box<dyn AllocationPolicy<D>> {
    Box::new(PassthroughPolicy)
}

/// Policy selected by a configuration value; `None` for [`PolicyKind::None`].
pub fn from_kind<D: Device>(kind: PolicyKind) -> Option<Box<dyn AllocationPolicy<D>>> {
    match kind {
        PolicyKind::None => None,
        PolicyKind::Passthrough => Some(passthrough()),
        PolicyKind::Linear(blocks) => Some(linear(blocks)),
    }
}

/// Leaves requests untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPolicy;

impl<D: Device> AllocationPolicy<D> for PassthroughPolicy {
    fn name(&self) -> &'static str {
        "Passthrough"
    }

    fn enact(
        &mut self,
        _device: &Arc<D>,
        _requirements: &vk::MemoryRequirements,
        _request: &mut AllocationRequest<'_>,
    ) -> Result<(), ResourceError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolEntry {
    memory_type_index: u32,
    handle: SubPoolHandle,
}

/// One linear sub-pool per memory type, created on first use.
///
/// The device is captured on the first [`enact`](AllocationPolicy::enact).
/// Dropping the policy retires its sub-pools; the device releases each one
/// once the last resource allocated from it is gone.
pub struct LinearPolicy<D: Device> {
    blocks: BlockConfig,
    pools: Vec<PoolEntry>,
    device: Option<Arc<D>>,
}

impl<D: Device> LinearPolicy<D> {
    /// Create a policy without sub-pools.
    pub fn new(blocks: BlockConfig) -> Self {
        Self {
            blocks,
            pools: Vec::with_capacity(crate::config::DEFAULT_RESERVE),
            device: None,
        }
    }

    /// Block sizing used for new sub-pools.
    pub fn blocks(&self) -> &BlockConfig {
        &self.blocks
    }

    /// Number of sub-pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Sub-pool serving `memory_type_index`, if one exists.
    pub fn pool_for(&self, memory_type_index: u32) -> Option<SubPoolHandle> {
        self.pools
            .iter()
            .find(|entry| entry.memory_type_index == memory_type_index)
            .map(|entry| entry.handle)
    }
}

impl<D: Device> AllocationPolicy<D> for LinearPolicy<D> {
    fn name(&self) -> &'static str {
        "Linear"
    }

    fn enact(
        &mut self,
        device: &Arc<D>,
        requirements: &vk::MemoryRequirements,
        request: &mut AllocationRequest<'_>,
    ) -> Result<(), ResourceError> {
        match &self.device {
            Some(owner) => assert!(
                Arc::ptr_eq(owner, device),
                "Linear policy used with a different device!"
            ),
            None => self.device = Some(Arc::clone(device)),
        }

        let memory_type_index = device
            .find_memory_type_index(requirements.memory_type_bits, &request.memory)
            .ok_or_else(|| {
                ResourceError::AllocationFailed(format!(
                    "no memory type for {:?} within type bits {:#b}",
                    request.memory.usage, requirements.memory_type_bits
                ))
            })?;

        let handle = match self.pool_for(memory_type_index) {
            Some(handle) => handle,
            None => {
                let handle = device.create_sub_pool(memory_type_index, &self.blocks)?;
                log::debug!(
                    "LinearPolicy: created sub-pool for memory type {} (block size {}, blocks {}..{})",
                    memory_type_index,
                    self.blocks.block_size,
                    self.blocks.min_block_count,
                    self.blocks.max_block_count
                );
                self.pools.push(PoolEntry {
                    memory_type_index,
                    handle,
                });
                handle
            }
        };

        request.pool = Some(handle);
        Ok(())
    }

    fn sub_pool_count(&self) -> usize {
        self.pool_count()
    }
}

impl<D: Device> Drop for LinearPolicy<D> {
    fn drop(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        for entry in self.pools.drain(..) {
            device.destroy_sub_pool(entry.handle);
        }
    }
}

impl<D: Device> std::fmt::Debug for LinearPolicy<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearPolicy")
            .field("blocks", &self.blocks)
            .field("pools", &self.pools)
            .finish()
    }
}
