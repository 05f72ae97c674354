//! Sampler properties and the deduplicating sampler cache.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::device::Device;
use crate::error::ResourceError;

/// Immutable sampling configuration, used as the sampler cache key.
///
/// Equality and hashing are structural over all four fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerProperties {
    /// Minification and magnification filter.
    pub filter: vk::Filter,
    /// Mipmap filter.
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Address mode for all coordinates.
    pub address_mode: vk::SamplerAddressMode,
    /// Border color for `CLAMP_TO_BORDER`.
    pub border_color: vk::BorderColor,
}

impl SamplerProperties {
    /// Create a linear filtering sampler configuration.
    pub fn linear() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            ..Default::default()
        }
    }

    /// Create a nearest neighbor sampler configuration.
    pub fn nearest() -> Self {
        Self::default()
    }

    /// Set the address mode for all coordinates.
    pub fn with_address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode = mode;
        self
    }

    /// Set the border color.
    pub fn with_border_color(mut self, color: vk::BorderColor) -> Self {
        self.border_color = color;
        self
    }

    /// Native create info for these properties.
    pub fn create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(self.filter)
            .min_filter(self.filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(self.border_color)
            .unnormalized_coordinates(false)
    }
}

impl Default for SamplerProperties {
    fn default() -> Self {
        Self {
            filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }
}

/// Cache of samplers keyed by [`SamplerProperties`].
///
/// Samplers are created on first request and shared by every image asking
/// for the same properties. The cache owns them; images only reference them,
/// so [`purge`](Self::purge) must not run while such images are alive.
///
/// Lookup-or-insert happens under one lock: concurrent requests for the same
/// properties create the sampler once and all observe the same handle.
pub struct SamplerCache<D: Device> {
    device: Arc<D>,
    cache: Mutex<HashMap<SamplerProperties, vk::Sampler>>,
}

impl<D: Device> SamplerCache<D> {
    /// Create an empty cache for `device`.
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get the sampler for `properties`, creating it on first use.
    pub fn retrieve(&self, properties: &SamplerProperties) -> Result<vk::Sampler, ResourceError> {
        let mut cache = self.cache.lock();
        if let Some(&sampler) = cache.get(properties) {
            return Ok(sampler);
        }

        let sampler = self.device.create_sampler(&properties.create_info())?;
        log::trace!("SamplerCache: created sampler for {:?}", properties);
        cache.insert(*properties, sampler);
        Ok(sampler)
    }

    /// Destroy every cached sampler.
    pub fn purge(&self) {
        let mut cache = self.cache.lock();
        if cache.is_empty() {
            return;
        }
        log::debug!("SamplerCache: destroying {} samplers", cache.len());
        for (_, sampler) in cache.drain() {
            self.device.destroy_sampler(sampler);
        }
    }

    /// Number of cached samplers.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether no sampler is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl<D: Device> Drop for SamplerCache<D> {
    fn drop(&mut self) {
        self.purge();
    }
}

impl<D: Device> std::fmt::Debug for SamplerCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerCache")
            .field("device", &self.device.name())
            .field("samplers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use super::*;
    use crate::device::DummyDevice;

    fn hash_of(properties: &SamplerProperties) -> u64 {
        let mut hasher = DefaultHasher::new();
        properties.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_properties_structural_equality() {
        let a = SamplerProperties::linear().with_address_mode(vk::SamplerAddressMode::REPEAT);
        let b = SamplerProperties::linear().with_address_mode(vk::SamplerAddressMode::REPEAT);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = b.with_border_color(vk::BorderColor::INT_OPAQUE_WHITE);
        assert_ne!(a, c);
    }

    #[test]
    fn test_retrieve_deduplicates() {
        let device = Arc::new(DummyDevice::new());
        let cache = SamplerCache::new(Arc::clone(&device));

        let first = cache.retrieve(&SamplerProperties::linear()).unwrap();
        let second = cache.retrieve(&SamplerProperties::linear()).unwrap();
        let other = cache.retrieve(&SamplerProperties::nearest()).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(cache.len(), 2);
        assert_eq!(device.stats().samplers_created, 2);
    }

    #[test]
    fn test_purge_and_drop_destroy_samplers() {
        let device = Arc::new(DummyDevice::new());
        let cache = SamplerCache::new(Arc::clone(&device));
        cache.retrieve(&SamplerProperties::linear()).unwrap();

        cache.purge();
        assert!(cache.is_empty());
        assert_eq!(device.stats().live_samplers(), 0);

        cache.retrieve(&SamplerProperties::nearest()).unwrap();
        drop(cache);
        assert_eq!(device.stats().live_samplers(), 0);
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let device = Arc::new(DummyDevice::new());
        let cache = SamplerCache::new(Arc::clone(&device));

        device.set_fail_samplers(true);
        assert_eq!(
            cache.retrieve(&SamplerProperties::linear()),
            Err(ResourceError::OutOfMemory)
        );
        assert!(cache.is_empty());

        device.set_fail_samplers(false);
        assert!(cache.retrieve(&SamplerProperties::linear()).is_ok());
    }
}
