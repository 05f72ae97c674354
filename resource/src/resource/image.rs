//! Image resources.

use std::sync::Arc;

use ash::vk;

use crate::device::{AllocationRequest, Device};
use crate::error::ResourceError;
use crate::policy::AllocationPolicy;
use crate::sampler::SamplerProperties;
use crate::types::{ImageDescriptor, ImageProperties, ViewProperties};

use super::{DeviceObject, Resource};

/// An image with its own view and device memory.
pub type Image<D> = Resource<D, ImageObject>;

/// Native part of an [`Image`].
///
/// The sampler is borrowed from a sampler cache and never destroyed here.
#[derive(Debug, Default)]
pub struct ImageObject {
    handle: vk::Image,
    view: vk::ImageView,
    sampler: vk::Sampler,
    layout: vk::ImageLayout,
    properties: ImageProperties,
    view_properties: ViewProperties,
    sampler_properties: SamplerProperties,
}

impl DeviceObject for ImageObject {
    const KIND: &'static str = "Image";

    fn is_null(&self) -> bool {
        self.handle == vk::Image::null()
    }

    fn destroy<D: Device>(&mut self, device: &D) {
        let view = std::mem::take(&mut self.view);
        if view != vk::ImageView::null() {
            device.destroy_image_view(view);
        }
        device.destroy_image(std::mem::take(&mut self.handle));
        self.sampler = vk::Sampler::null();
    }
}

impl<D: Device> Resource<D, ImageObject> {
    /// The native image handle; null when empty.
    pub fn handle(&self) -> vk::Image {
        self.object().handle
    }

    /// The view over all mips and layers.
    pub fn view(&self) -> vk::ImageView {
        self.object().view
    }

    /// The cached sampler this image samples with.
    pub fn sampler(&self) -> vk::Sampler {
        self.object().sampler
    }

    /// Layout last recorded by the execution layer.
    pub fn layout(&self) -> vk::ImageLayout {
        self.object().layout
    }

    /// Record the layout the execution layer transitioned the image to.
    pub fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.object_mut().layout = layout;
    }

    /// Shape, format and usage recorded at creation.
    pub fn properties(&self) -> &ImageProperties {
        &self.object().properties
    }

    /// View configuration recorded at creation.
    pub fn view_properties(&self) -> &ViewProperties {
        &self.object().view_properties
    }

    /// Sampler configuration recorded at creation.
    pub fn sampler_properties(&self) -> &SamplerProperties {
        &self.object().sampler_properties
    }

    /// Extent in texels.
    pub fn extent(&self) -> vk::Extent3D {
        self.object().properties.extent
    }
}

/// Create an image, allocate and bind its memory, then create its view.
///
/// Construction has two phases: the image with its memory, then the view.
/// If the view fails, the image and its memory are released again.
pub(crate) fn create_image<D: Device>(
    device: &Arc<D>,
    descriptor: &ImageDescriptor,
    sampler: vk::Sampler,
    policy: Option<&mut Box<dyn AllocationPolicy<D>>>,
) -> Result<Image<D>, ResourceError> {
    crate::profile_scope!("create_image");

    let props = &descriptor.image;
    let info = vk::ImageCreateInfo::default()
        .image_type(props.image_type)
        .format(props.format)
        .extent(props.extent)
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(props.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(descriptor.initial_layout);
    let handle = device.create_image(&info)?;

    let mut image = Resource::new(
        Arc::clone(device),
        ImageObject {
            handle,
            view: vk::ImageView::null(),
            sampler,
            layout: descriptor.initial_layout,
            properties: *props,
            view_properties: descriptor.view,
            sampler_properties: descriptor.sampler,
        },
    );

    let requirements = device.image_memory_requirements(handle);
    let name = descriptor.label.as_deref().unwrap_or("image");
    let mut request = AllocationRequest::image(name, descriptor.memory);
    if let Some(policy) = policy {
        policy.enact(device, &requirements, &mut request)?;
    }

    let allocation = device.allocate_memory(&requirements, &request)?;
    let allocation = image.attach_memory(allocation);
    device.bind_image_memory(handle, allocation)?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(handle)
        .view_type(descriptor.view.view_type)
        .format(descriptor.view.format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        });
    image.object_mut().view = device.create_image_view(&view_info)?;

    log::trace!(
        "Created image {:?} ({}x{}x{}, {:?})",
        descriptor.label,
        props.extent.width,
        props.extent.height,
        props.extent.depth,
        props.format
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;
    use crate::memory::MemoryProperties;

    fn descriptor() -> ImageDescriptor {
        ImageDescriptor::new(
            ImageProperties::new_2d(
                vk::Format::R8G8B8A8_UNORM,
                16,
                16,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            ),
            MemoryProperties::gpu_only(),
        )
    }

    #[test]
    fn test_create_image_with_view() {
        let device = Arc::new(DummyDevice::new());
        let image = create_image(&device, &descriptor(), vk::Sampler::null(), None).unwrap();

        assert_ne!(image.handle(), vk::Image::null());
        assert_ne!(image.view(), vk::ImageView::null());
        assert_eq!(image.layout(), vk::ImageLayout::UNDEFINED);
        assert_eq!(image.view_properties().view_type, vk::ImageViewType::TYPE_2D);

        drop(image);
        let stats = device.stats();
        assert_eq!(stats.live_images(), 0);
        assert_eq!(stats.live_views(), 0);
        assert_eq!(stats.live_allocations(), 0);
    }

    #[test]
    fn test_set_layout() {
        let device = Arc::new(DummyDevice::new());
        let mut image = create_image(&device, &descriptor(), vk::Sampler::null(), None).unwrap();
        image.set_layout(vk::ImageLayout::GENERAL);
        assert_eq!(image.layout(), vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_view_failure_rolls_back() {
        let device = Arc::new(DummyDevice::new());
        device.set_fail_image_views(true);

        let result = create_image(&device, &descriptor(), vk::Sampler::null(), None);
        assert!(matches!(result, Err(ResourceError::ResourceCreationFailed(_))));

        let stats = device.stats();
        assert_eq!(stats.images_created, 1);
        assert_eq!(stats.live_images(), 0);
        assert_eq!(stats.live_allocations(), 0);
        assert_eq!(stats.invalid_destroys, 0);
    }

    #[test]
    fn test_sampler_is_not_destroyed_with_image() {
        let device = Arc::new(DummyDevice::new());
        let sampler = device
            .create_sampler(&vk::SamplerCreateInfo::default())
            .unwrap();
        let image = create_image(&device, &descriptor(), sampler, None).unwrap();
        assert_eq!(image.sampler(), sampler);

        drop(image);
        assert_eq!(device.stats().live_samplers(), 1);
        device.destroy_sampler(sampler);
    }
}
