//! Buffer and image descriptors.

use ash::vk;

use crate::memory::MemoryProperties;
use crate::sampler::SamplerProperties;

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Native usage flags.
    pub usage: vk::BufferUsageFlags,
    /// Memory placement.
    pub memory: MemoryProperties,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: vk::BufferUsageFlags, memory: MemoryProperties) -> Self {
        Self {
            label: None,
            size,
            usage,
            memory,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Shape and format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageProperties {
    /// Dimensionality.
    pub image_type: vk::ImageType,
    /// Texel format.
    pub format: vk::Format,
    /// Size in texels.
    pub extent: vk::Extent3D,
    /// Native usage flags.
    pub usage: vk::ImageUsageFlags,
}

impl ImageProperties {
    /// A single-mip 3D image.
    pub fn new_3d(format: vk::Format, extent: vk::Extent3D, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_3D,
            format,
            extent,
            usage,
        }
    }

    /// A single-mip 2D image.
    pub fn new_2d(format: vk::Format, width: u32, height: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            usage,
        }
    }
}

impl Default for ImageProperties {
    fn default() -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D::default(),
            usage: vk::ImageUsageFlags::empty(),
        }
    }
}

/// How the image view interprets the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewProperties {
    /// View dimensionality.
    pub view_type: vk::ImageViewType,
    /// View format.
    pub format: vk::Format,
}

impl ViewProperties {
    /// Create view properties.
    pub fn new(view_type: vk::ImageViewType, format: vk::Format) -> Self {
        Self { view_type, format }
    }

    /// View matching an image's own type and format.
    pub fn matching(image: &ImageProperties) -> Self {
        let view_type = match image.image_type {
            vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
            vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
            _ => vk::ImageViewType::TYPE_2D,
        };
        Self::new(view_type, image.format)
    }
}

impl Default for ViewProperties {
    fn default() -> Self {
        Self::new(vk::ImageViewType::TYPE_2D, vk::Format::UNDEFINED)
    }
}

/// Descriptor for creating a pooled image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ImageDescriptor {
    /// Debug label for the image.
    pub label: Option<String>,
    /// Image shape, format and usage.
    pub image: ImageProperties,
    /// View configuration.
    pub view: ViewProperties,
    /// Sampler configuration, resolved through the pool's sampler cache.
    pub sampler: SamplerProperties,
    /// Memory placement.
    pub memory: MemoryProperties,
    /// Layout the image is created in.
    pub initial_layout: vk::ImageLayout,
}

impl ImageDescriptor {
    /// Create a descriptor with a view matching the image and default sampling.
    pub fn new(image: ImageProperties, memory: MemoryProperties) -> Self {
        Self {
            label: None,
            view: ViewProperties::matching(&image),
            image,
            sampler: SamplerProperties::default(),
            memory,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the view configuration.
    pub fn with_view(mut self, view: ViewProperties) -> Self {
        self.view = view;
        self
    }

    /// Set the sampler configuration.
    pub fn with_sampler(mut self, sampler: SamplerProperties) -> Self {
        self.sampler = sampler;
        self
    }

    /// Set the initial layout.
    pub fn with_initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }
}
