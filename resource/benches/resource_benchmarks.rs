use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use ash::vk;
use redlilium_resource::{
    BlockConfig, BufferDescriptor, DummyDevice, MemoryAllocator, MemoryProperties, PoolConfig,
    ResourcePool, SamplerProperties,
};

fn descriptor(size: u64) -> BufferDescriptor {
    BufferDescriptor::new(
        size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryProperties::cpu_to_gpu(),
    )
}

// ---------------------------------------------------------------------------
// Direct creation
// ---------------------------------------------------------------------------

fn bench_direct_create_buffer(c: &mut Criterion) {
    let allocator = MemoryAllocator::new(Arc::new(DummyDevice::new()));

    c.bench_function("direct_create_buffer_4k", |b| {
        b.iter(|| {
            black_box(allocator.create_staging_buffer(4096).unwrap());
        });
    });
}

fn bench_sampler_retrieve(c: &mut Criterion) {
    let allocator = MemoryAllocator::new(Arc::new(DummyDevice::new()));
    let cache = allocator.create_sampler_cache();
    let properties = SamplerProperties::linear();
    cache.retrieve(&properties).unwrap();

    c.bench_function("sampler_cache_retrieve_hit", |b| {
        b.iter(|| {
            black_box(cache.retrieve(black_box(&properties)).unwrap());
        });
    });
}

// ---------------------------------------------------------------------------
// Pool cycles
// ---------------------------------------------------------------------------

fn bench_pool_cycle(c: &mut Criterion, name: &str, config: PoolConfig) {
    let mut pool = ResourcePool::new(Arc::new(DummyDevice::new()), config);

    c.bench_function(name, |b| {
        b.iter(|| {
            for size in [256, 1024, 4096, 16384] {
                let buffer = pool.create_buffer(&descriptor(size)).unwrap();
                pool.register_buffer_cleanup(buffer);
            }
            pool.fence().unwrap().submit_handle();
            pool.purge().unwrap();
        });
    });
}

fn bench_pool_cycle_direct(c: &mut Criterion) {
    bench_pool_cycle(c, "pool_cycle_4_buffers", PoolConfig::new());
}

fn bench_pool_cycle_linear(c: &mut Criterion) {
    bench_pool_cycle(
        c,
        "pool_cycle_4_buffers_linear",
        PoolConfig::new().with_linear_policy(BlockConfig::new(1 << 20, 0, 0)),
    );
}

criterion_group!(
    benches,
    bench_direct_create_buffer,
    bench_sampler_retrieve,
    bench_pool_cycle_direct,
    bench_pool_cycle_linear,
);
criterion_main!(benches);
