// SPDX-License-Identifier: CEPL-1.0
use crate::device::DeviceContext;
use crate::pipeline::RenderPipeline;
use crate::presenter::SurfacePresenter;
use crate::texture::TextureStreamer;
use anyhow::{Context, Result};
use ash::vk;
use fbview_render::{Acquired, FrameBackend, Presented, RenderSize};

/// Everything one frame touches. Field order is not drop order; see `Drop`.
pub(crate) struct VkBackend {
    pub presenter: SurfacePresenter,
    pub texture: TextureStreamer,
    pub pipeline: RenderPipeline,
    pub clear: vk::ClearValue,
    pub ctx: DeviceContext,
}

pub(crate) fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

impl VkBackend {
    unsafe fn record(&self, image: u32) -> Result<()> {
        let d = &self.ctx.device;
        let cmd = self.ctx.frame_cmd;
        let framebuffer = self.presenter.framebuffer(image)?;
        let ext = self.presenter.extent();
        let extent = vk::Extent2D {
            width: ext.width,
            height: ext.height,
        };

        d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &bi)?;

        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.pipeline.render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: 1,
            p_clear_values: &self.clear,
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
        d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));

        d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.pipeline_layout,
            0,
            std::slice::from_ref(&self.pipeline.desc_set),
            &[],
        );
        // quad as a triangle fan
        d.cmd_draw(cmd, 4, 1, 0, 0);

        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd)?;
        Ok(())
    }
}

impl FrameBackend for VkBackend {
    fn wait_in_flight(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.ctx.sync.in_flight], true, u64::MAX)
                .context("wait_for_fences(in_flight)")
        }
    }

    fn reset_in_flight(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .reset_fences(&[self.ctx.sync.in_flight])
                .context("reset_fences(in_flight)")
        }
    }

    fn acquire_image(&mut self) -> Result<Acquired> {
        unsafe { self.presenter.acquire(&self.ctx) }
    }

    fn record_frame(&mut self, image: u32) -> Result<()> {
        unsafe { self.record(image) }
    }

    // STRICT: wait image-available at color output, signal render-finished + in-flight fence.
    fn submit_frame(&mut self) -> Result<()> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.ctx.sync.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &self.ctx.frame_cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.ctx.sync.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(
                    self.ctx.queue,
                    std::slice::from_ref(&submit),
                    self.ctx.sync.in_flight,
                )
                .context("queue_submit")
        }
    }

    fn present_image(&mut self, image: u32) -> Result<Presented> {
        unsafe { self.presenter.present(&self.ctx, image) }
    }

    fn recreate(&mut self, size: RenderSize) -> Result<RenderSize> {
        unsafe {
            self.presenter
                .recreate(&self.ctx, &self.pipeline, &mut self.texture, size)
        }
    }
}

// STRICT TEARDOWN ORDER:
// - device idle
// - swapchain targets + swapchain, texture + staging, pipeline objects
// - DeviceContext last (its own Drop runs after this one)
impl Drop for VkBackend {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
            self.presenter.destroy(&self.ctx);
            self.texture.destroy(&self.ctx);
            self.pipeline.destroy(&self.ctx);
        }
    }
}
