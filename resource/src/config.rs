//! Configuration for allocators, suballocation policies and resource pools.
//!
//! All configuration is plain data built in code; nothing is read from files
//! or the environment.

/// Number of release-list and fence slots a pool reserves up front.
pub const DEFAULT_RESERVE: usize = 16;

/// Default size of one suballocation block (64 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Block sizing for one suballocation sub-pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockConfig {
    /// Size in bytes of each device memory block.
    pub block_size: u64,
    /// Blocks to keep reserved even when empty.
    ///
    /// The dummy device charges the reservation against its budget when the
    /// sub-pool is created. On Vulkan it is advisory: gpu-allocator creates
    /// blocks on first use.
    pub min_block_count: u32,
    /// Upper bound on blocks per sub-pool; `0` means unbounded.
    pub max_block_count: u32,
}

impl BlockConfig {
    /// Create a block configuration.
    pub fn new(block_size: u64, min_block_count: u32, max_block_count: u32) -> Self {
        Self {
            block_size,
            min_block_count,
            max_block_count,
        }
    }

    /// Byte capacity of a sub-pool with this configuration, if bounded.
    pub fn capacity(&self) -> Option<u64> {
        (self.max_block_count != 0)
            .then(|| self.block_size.saturating_mul(u64::from(self.max_block_count)))
    }
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, 0, 0)
    }
}

/// Which suballocation policy a pool is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolicyKind {
    /// No policy; every request goes to the top-level allocator.
    #[default]
    None,
    /// An explicit policy object that leaves requests untouched.
    Passthrough,
    /// Per-memory-type linear sub-pools.
    Linear(BlockConfig),
}

/// Parameters for a [`ResourcePool`](crate::ResourcePool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolConfig {
    /// Initial capacity of the release lists and the fence array.
    pub reserve: usize,
    /// Suballocation policy.
    pub policy: PolicyKind,
}

impl PoolConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial reserve.
    pub fn with_reserve(mut self, reserve: usize) -> Self {
        self.reserve = reserve;
        self
    }

    /// Use linear sub-pools with the given block sizing.
    pub fn with_linear_policy(mut self, blocks: BlockConfig) -> Self {
        self.policy = PolicyKind::Linear(blocks);
        self
    }

    /// Set the policy kind.
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reserve: DEFAULT_RESERVE,
            policy: PolicyKind::None,
        }
    }
}

/// Parameters for a [`MemoryAllocator`](crate::MemoryAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocatorConfig {
    /// Create float images with 16-bit channels instead of 32-bit ones.
    pub half_precision_images: bool,
}

impl AllocatorConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle 16-bit float image formats.
    pub fn with_half_precision_images(mut self, enabled: bool) -> Self {
        self.half_precision_images = enabled;
        self
    }
}
