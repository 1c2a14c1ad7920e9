// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use fbview_render::{
    FrameOutcome, FrameScheduler, FrameStats, FramebufferSource, RenderConfig, RenderSize,
    Renderer, ResizeOutcome, UploadError,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

mod device;
mod frame;
mod pipeline;
mod presenter;
mod shaders;
mod texture;

pub use device::DeviceContext;
pub use pipeline::RenderPipeline;
pub use presenter::{SurfacePresenter, SwapchainError, MAX_SWAPCHAIN_IMAGES};
pub use shaders::{decode_spirv, shader_source, ShaderSource, SpirvDir};
pub use texture::{TextureStreamer, TEXTURE_FORMAT};

#[cfg(feature = "embed-shaders")]
pub use shaders::Embedded;

use frame::{clear_value, VkBackend};

/// Vulkan presentation engine: one streamed texture drawn as a full-window quad.
pub struct VkEngine {
    scheduler: FrameScheduler,
    backend: VkBackend,
}

// STRICT ORDER:
// 1) DeviceContext (instance → surface → device → pool/sync)
// 2) surface format → RenderPipeline (render pass needed by framebuffers)
// 3) SurfacePresenter at the requested size
// 4) TextureStreamer at the SWAPCHAIN extent (not the request)
// 5) descriptor set → texture view
unsafe fn build_engine(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    cfg: &RenderConfig,
) -> Result<VkEngine> {
    let ctx = DeviceContext::new(window, display, cfg)?;

    let surface_format = SurfacePresenter::query_format(&ctx)?;
    let shaders = shader_source(&cfg.shader_dir);
    let mut pipeline = RenderPipeline::new(&ctx, surface_format.format, shaders.as_ref())?;

    let mut presenter = match SurfacePresenter::new(&ctx, surface_format, &pipeline, size) {
        Ok(p) => p,
        Err(e) => {
            pipeline.destroy(&ctx);
            return Err(e);
        }
    };

    let texture = match TextureStreamer::new(&ctx, presenter.extent(), cfg.max_size) {
        Ok(t) => t,
        Err(e) => {
            presenter.destroy(&ctx);
            pipeline.destroy(&ctx);
            return Err(e);
        }
    };
    pipeline.bind_texture(&ctx, texture.view());

    let extent = presenter.extent();
    info!(
        "vk engine ready: {}x{}, {} swapchain images, staging {} bytes",
        extent.width,
        extent.height,
        presenter.image_count(),
        texture.staging_capacity()
    );

    Ok(VkEngine {
        scheduler: FrameScheduler::new(cfg.min_size),
        backend: VkBackend {
            presenter,
            texture,
            pipeline,
            clear: clear_value(cfg.clear_color),
            ctx,
        },
    })
}

impl Renderer for VkEngine {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        unsafe { build_engine(window, display, size, cfg) }
    }

    fn resize(&mut self, size: RenderSize) -> Result<ResizeOutcome> {
        self.scheduler.on_resize(&mut self.backend, size)
    }

    fn settle(&mut self, framebuffer: &dyn FramebufferSource) -> Result<Option<RenderSize>> {
        self.scheduler.settle(&mut self.backend, framebuffer)
    }

    fn upload(&mut self, payload: &[u8]) -> Result<(), UploadError> {
        let VkBackend { texture, ctx, .. } = &mut self.backend;
        unsafe { texture.upload(ctx, payload) }
    }

    fn render(&mut self, framebuffer: &dyn FramebufferSource) -> Result<FrameOutcome> {
        self.scheduler.run_frame(&mut self.backend, framebuffer)
    }

    fn extent(&self) -> RenderSize {
        self.backend.texture.extent()
    }

    fn stats(&self) -> FrameStats {
        self.scheduler.stats()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        // picked up by the next recorded frame
        self.backend.clear = clear_value(rgba);
    }
}
