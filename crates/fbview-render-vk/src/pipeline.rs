// SPDX-License-Identifier: CEPL-1.0
use crate::device::DeviceContext;
use crate::shaders::ShaderSource;
use anyhow::{anyhow, Context, Result};
use ash::vk;

/// Render pass, graphics pipeline, sampler and the one descriptor set that samples the frame.
pub struct RenderPipeline {
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) desc_set_layout: vk::DescriptorSetLayout,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) sampler: vk::Sampler,
    pub(crate) desc_pool: vk::DescriptorPool,
    pub(crate) desc_set: vk::DescriptorSet,
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    // Layout transition waits for the acquire semaphore, which is waited at this stage.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    Ok(device.create_render_pass(&ci, None)?)
}

unsafe fn create_frame_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(device.create_shader_module(&ci, None)?)
}

unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // No vertex buffers: the vertex shader derives the quad corners from gl_VertexIndex.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_FAN,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => Ok(p[0]),
        Err((_, err)) => Err(anyhow!("create_graphics_pipelines failed: {err:?}")),
    }
}

unsafe fn create_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        max_anisotropy: 1.0,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        ..Default::default()
    };
    Ok(device.create_sampler(&ci, None)?)
}

unsafe fn create_frame_descriptor(
    device: &ash::Device,
    layout: vk::DescriptorSetLayout,
) -> Result<(vk::DescriptorPool, vk::DescriptorSet)> {
    let size = vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
    };
    let pool_ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: 1,
        pool_size_count: 1,
        p_pool_sizes: &size,
        ..Default::default()
    };
    let pool = device.create_descriptor_pool(&pool_ci, None)?;

    let ai = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: 1,
        p_set_layouts: &layout,
        ..Default::default()
    };
    let sets = match device.allocate_descriptor_sets(&ai) {
        Ok(s) => s,
        Err(e) => {
            device.destroy_descriptor_pool(pool, None);
            return Err(e.into());
        }
    };
    Ok((pool, sets[0]))
}

impl RenderPipeline {
    /// Builds everything that depends on the presentation format but not on the extent.
    pub unsafe fn new(
        ctx: &DeviceContext,
        color_format: vk::Format,
        shaders: &dyn ShaderSource,
    ) -> Result<Self> {
        let d = &ctx.device;
        let vs_code = shaders.load("vert")?;
        let fs_code = shaders.load("frag")?;

        let mut p = RenderPipeline {
            render_pass: vk::RenderPass::null(),
            desc_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            sampler: vk::Sampler::null(),
            desc_pool: vk::DescriptorPool::null(),
            desc_set: vk::DescriptorSet::null(),
        };
        if let Err(e) = p.build(d, color_format, &vs_code, &fs_code) {
            p.destroy(ctx);
            return Err(e);
        }
        Ok(p)
    }

    unsafe fn build(
        &mut self,
        d: &ash::Device,
        color_format: vk::Format,
        vs_code: &[u32],
        fs_code: &[u32],
    ) -> Result<()> {
        self.render_pass = create_render_pass(d, color_format).context("create_render_pass")?;
        self.desc_set_layout = create_frame_set_layout(d).context("create_descriptor_set_layout")?;

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &self.desc_set_layout,
            ..Default::default()
        };
        self.pipeline_layout = d
            .create_pipeline_layout(&layout_info, None)
            .context("create_pipeline_layout")?;

        let vs = create_shader_module(d, vs_code).context("vertex shader module")?;
        let fs = match create_shader_module(d, fs_code) {
            Ok(m) => m,
            Err(e) => {
                d.destroy_shader_module(vs, None);
                return Err(e.context("fragment shader module"));
            }
        };
        let pipeline =
            create_graphics_pipeline(d, self.render_pass, self.pipeline_layout, vs, fs);
        d.destroy_shader_module(vs, None);
        d.destroy_shader_module(fs, None);
        self.pipeline = pipeline?;

        self.sampler = create_sampler(d).context("create_sampler")?;
        let (pool, set) =
            create_frame_descriptor(d, self.desc_set_layout).context("frame descriptor set")?;
        self.desc_pool = pool;
        self.desc_set = set;
        Ok(())
    }

    /// Points the sampled-image binding at `view`. Caller guarantees no frame using the set is pending.
    pub unsafe fn bind_texture(&self, ctx: &DeviceContext, view: vk::ImageView) {
        let info = vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: self.desc_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &info,
            ..Default::default()
        };
        ctx.device
            .update_descriptor_sets(std::slice::from_ref(&write), &[]);
    }

    // Safe to call twice; handles are nulled after destroy.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        let d = &ctx.device;
        if self.desc_pool != vk::DescriptorPool::null() {
            // frees desc_set with it
            d.destroy_descriptor_pool(self.desc_pool, None);
            self.desc_pool = vk::DescriptorPool::null();
            self.desc_set = vk::DescriptorSet::null();
        }
        if self.sampler != vk::Sampler::null() {
            d.destroy_sampler(self.sampler, None);
            self.sampler = vk::Sampler::null();
        }
        if self.pipeline != vk::Pipeline::null() {
            d.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            self.pipeline_layout = vk::PipelineLayout::null();
        }
        if self.desc_set_layout != vk::DescriptorSetLayout::null() {
            d.destroy_descriptor_set_layout(self.desc_set_layout, None);
            self.desc_set_layout = vk::DescriptorSetLayout::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            d.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
    }
}
