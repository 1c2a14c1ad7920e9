// SPDX-License-Identifier: CEPL-1.0
use crate::device::DeviceContext;
use crate::pipeline::RenderPipeline;
use crate::texture::TextureStreamer;
use anyhow::{anyhow, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use fbview_render::{Acquired, Presented, RenderSize};
use thiserror::Error;
use tracing::info;

pub const MAX_SWAPCHAIN_IMAGES: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwapchainError {
    #[error("swapchain has {count} images, capacity is {max}")]
    TooManyImages { count: usize, max: usize },
}

pub(crate) struct SwapchainTarget {
    #[allow(dead_code)]
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

/// Swapchain plus one (image, view, framebuffer) per swapchain image.
pub struct SurfacePresenter {
    loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    targets: Vec<SwapchainTarget>,
}

/// `B8G8R8A8_UNORM` when offered, else whatever the surface lists first.
pub(crate) fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
        .or_else(|| formats.first().copied())
}

/// One more than the minimum, capped by the maximum (0 == no maximum).
pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub(crate) fn check_image_count(count: usize) -> Result<(), SwapchainError> {
    if count > MAX_SWAPCHAIN_IMAGES {
        return Err(SwapchainError::TooManyImages {
            count,
            max: MAX_SWAPCHAIN_IMAGES,
        });
    }
    Ok(())
}

impl SurfacePresenter {
    pub unsafe fn query_format(ctx: &DeviceContext) -> Result<vk::SurfaceFormatKHR> {
        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.phys, ctx.surface)
            .context("get_physical_device_surface_formats")?;
        let chosen =
            choose_surface_format(&formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
        info!(
            "surface format {:?} / {:?}",
            chosen.format, chosen.color_space
        );
        Ok(chosen)
    }

    pub unsafe fn new(
        ctx: &DeviceContext,
        surface_format: vk::SurfaceFormatKHR,
        pipeline: &RenderPipeline,
        size: RenderSize,
    ) -> Result<Self> {
        let mut p = Self {
            loader: swapchain::Device::new(&ctx.instance, &ctx.device),
            swapchain: vk::SwapchainKHR::null(),
            surface_format,
            extent: vk::Extent2D::default(),
            targets: Vec::new(),
        };
        p.create(ctx, pipeline.render_pass, size)?;
        Ok(p)
    }

    pub fn extent(&self) -> RenderSize {
        RenderSize::new(self.extent.width, self.extent.height)
    }

    pub fn image_count(&self) -> usize {
        self.targets.len()
    }

    pub(crate) fn framebuffer(&self, image: u32) -> Result<vk::Framebuffer> {
        self.targets
            .get(image as usize)
            .map(|t| t.framebuffer)
            .ok_or_else(|| anyhow!("swapchain image {image} out of range"))
    }

    /// Builds the swapchain and its per-image targets. Expects the previous ones destroyed.
    pub unsafe fn create(
        &mut self,
        ctx: &DeviceContext,
        render_pass: vk::RenderPass,
        size: RenderSize,
    ) -> Result<()> {
        debug_assert!(self.swapchain == vk::SwapchainKHR::null());

        let caps = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.phys, ctx.surface)
            .context("get_physical_device_surface_capabilities")?;
        let extent = extent_from_caps(&caps, size);
        let min_image_count = choose_image_count(&caps);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count,
            image_format: self.surface_format.format,
            image_color_space: self.surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: vk::PresentModeKHR::FIFO,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        self.swapchain = self
            .loader
            .create_swapchain(&ci, None)
            .context("create_swapchain")?;
        self.extent = extent;

        let images = self
            .loader
            .get_swapchain_images(self.swapchain)
            .context("get_swapchain_images")?;
        if let Err(e) = check_image_count(images.len()) {
            self.destroy_swapchain(ctx);
            return Err(e.into());
        }

        for &image in &images {
            if let Err(e) = self.push_target(ctx, render_pass, image) {
                self.destroy_swapchain(ctx);
                return Err(e);
            }
        }

        info!(
            "swapchain: {}x{}, {} images (min={} requested={}), FIFO",
            extent.width,
            extent.height,
            images.len(),
            caps.min_image_count,
            min_image_count
        );
        Ok(())
    }

    unsafe fn push_target(
        &mut self,
        ctx: &DeviceContext,
        render_pass: vk::RenderPass,
        image: vk::Image,
    ) -> Result<()> {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: self.surface_format.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = ctx
            .device
            .create_image_view(&iv_info, None)
            .context("create_image_view(swapchain)")?;

        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: self.extent.width,
            height: self.extent.height,
            layers: 1,
            ..Default::default()
        };
        let framebuffer = match ctx.device.create_framebuffer(&fb_info, None) {
            Ok(fb) => fb,
            Err(e) => {
                ctx.device.destroy_image_view(view, None);
                return Err(anyhow!("create_framebuffer: {e:?}"));
            }
        };
        self.targets.push(SwapchainTarget {
            image,
            view,
            framebuffer,
        });
        Ok(())
    }

    // Idempotent: framebuffers and views before the swapchain that owns the images.
    pub unsafe fn destroy_swapchain(&mut self, ctx: &DeviceContext) {
        for t in self.targets.drain(..) {
            ctx.device.destroy_framebuffer(t.framebuffer, None);
            ctx.device.destroy_image_view(t.view, None);
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    // STRICT ORDER:
    // 1) device idle (nothing in flight references the old images or texture)
    // 2) swapchain targets, then the swapchain
    // 3) old texture
    // 4) new swapchain, then texture at the NEW extent
    // 5) descriptor set → new texture view
    pub unsafe fn recreate(
        &mut self,
        ctx: &DeviceContext,
        pipeline: &RenderPipeline,
        texture: &mut TextureStreamer,
        size: RenderSize,
    ) -> Result<RenderSize> {
        ctx.wait_idle()?;

        self.destroy_swapchain(ctx);
        texture.destroy_image(ctx);

        self.create(ctx, pipeline.render_pass, size)?;
        texture.create_image(ctx, self.extent)?;
        pipeline.bind_texture(ctx, texture.view());

        Ok(self.extent())
    }

    pub unsafe fn acquire(&self, ctx: &DeviceContext) -> Result<Acquired> {
        match self.loader.acquire_next_image(
            self.swapchain,
            u64::MAX,
            ctx.sync.image_available,
            vk::Fence::null(),
        ) {
            // Suboptimal still signals the semaphore; present reports it.
            Ok((index, _suboptimal)) => Ok(Acquired::Image(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Stale),
            Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
        }
    }

    pub unsafe fn present(&self, ctx: &DeviceContext, image: u32) -> Result<Presented> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &ctx.sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        present_outcome(self.loader.queue_present(ctx.queue, &present))
    }

    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        self.destroy_swapchain(ctx);
    }
}

/// ash folds SUBOPTIMAL into `Ok(true)`; only OUT_OF_DATE arrives as an error.
pub(crate) fn present_outcome(res: ash::prelude::VkResult<bool>) -> Result<Presented> {
    match res {
        Ok(false) => Ok(Presented::Done),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Stale),
        Err(e) => Err(anyhow!("queue_present: {e:?}")),
    }
}
