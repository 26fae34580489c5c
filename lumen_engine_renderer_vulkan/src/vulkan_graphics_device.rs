/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Owns the logical device, its queues and the two command pools (per-frame
/// and one-time). Engine handles carry the raw value of the Vulkan handle, so
/// no lookup tables are kept here.

use ash::vk;
use lumen_engine::lumen::graphics_device::{
    AcquiredImage, AttachmentDesc, BlitRegion, BufferHandle, ClearValue, CommandBufferHandle, CommandBufferKind,
    DescriptorPoolDesc, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite, Extent2D, FenceHandle, FramebufferDesc, FramebufferHandle, GraphicsDevice,
    ImageBarrier, ImageHandle, ImageViewDesc, ImageViewHandle, IndexType, PipelineDesc,
    PipelineHandle, PipelineLayoutHandle, PipelineObjects, PresentMode, PresentStatus,
    QueueFamilyIndices, Rect2D, RenderPassBegin, RenderPassDesc, RenderPassHandle, SamplerDesc,
    SamplerHandle, SemaphoreHandle, ShaderStages, SharingMode, SubmitInfo, SurfaceCapabilities,
    SurfaceFormat, SwapchainCreateInfo, SwapchainHandle, Viewport,
};
use lumen_engine::lumen::{Error, Result};
use lumen_engine::{engine_bail, engine_err, engine_error, engine_warn};
use std::ffi::CStr;
use std::fs::File;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::vulkan_format::*;

const SOURCE: &str = "lumen::vulkan";

const SHADER_ENTRY: &CStr = c"main";

/// Queue and pool setup chosen by the backend for one physical device
pub(crate) struct DeviceSelection {
    pub physical_device: vk::PhysicalDevice,
    pub families: QueueFamilyIndices,
    pub max_anisotropy: f32,
}

pub struct VulkanGraphicsDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Queue submission and present are externally synchronized
    queue_lock: Mutex<()>,
    frame_pool: Mutex<vk::CommandPool>,
    one_time_pool: Mutex<vk::CommandPool>,
    max_anisotropy: f32,
}

impl VulkanGraphicsDevice {
    pub(crate) fn new(
        instance: &ash::Instance,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        selection: DeviceSelection,
    ) -> Result<Self> {
        let DeviceSelection { physical_device, families, max_anisotropy } = selection;

        let queue_priorities = [1.0];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(families.graphics)
            .queue_priorities(&queue_priorities)];
        if families.present != families.graphics {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(families.present)
                    .queue_priorities(&queue_priorities),
            );
        }

        let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(max_anisotropy > 1.0)
            .multi_draw_indirect(true);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extension_names)
            .enabled_features(&device_features);

        // SAFETY: physical device and surface come from the same live instance
        unsafe {
            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    engine_error!(SOURCE, "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);

            let frame_pool = match Self::create_command_pool(
                &device,
                families.graphics,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_device(None);
                    return Err(e);
                }
            };
            let one_time_pool = match Self::create_command_pool(
                &device,
                families.graphics,
                vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_command_pool(frame_pool, None);
                    device.destroy_device(None);
                    return Err(e);
                }
            };

            let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);

            Ok(Self {
                device,
                physical_device,
                surface_loader,
                surface,
                swapchain_loader,
                families,
                graphics_queue,
                present_queue,
                queue_lock: Mutex::new(()),
                frame_pool: Mutex::new(frame_pool),
                one_time_pool: Mutex::new(one_time_pool),
                max_anisotropy,
            })
        }
    }

    fn create_command_pool(
        device: &ash::Device,
        family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default().queue_family_index(family).flags(flags);
        // SAFETY: valid device
        unsafe {
            device.create_command_pool(&info, None).map_err(|e| {
                engine_error!(SOURCE, "Failed to create command pool: {:?}", e);
                Error::InitializationFailed(format!("Failed to create command pool: {:?}", e))
            })
        }
    }

    /// Raw device, for the allocator
    pub(crate) fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn pool(&self, kind: CommandBufferKind) -> Result<MutexGuard<'_, vk::CommandPool>> {
        let pool = match kind {
            CommandBufferKind::Frame => &self.frame_pool,
            CommandBufferKind::OneTime => &self.one_time_pool,
        };
        pool.lock().map_err(|_| engine_err!(SOURCE, "Command pool lock poisoned"))
    }

    fn queue(&self) -> Result<MutexGuard<'_, ()>> {
        self.queue_lock.lock().map_err(|_| engine_err!(SOURCE, "Queue lock poisoned"))
    }

    fn cmd(command_buffer: CommandBufferHandle) -> vk::CommandBuffer {
        from_raw(command_buffer.0)
    }

    fn load_shader_module(&self, path: &Path) -> Result<vk::ShaderModule> {
        let mut file = File::open(path)
            .map_err(|e| engine_err!(SOURCE, "Failed to open shader '{}': {}", path.display(), e))?;
        let code = ash::util::read_spv(&mut file)
            .map_err(|e| engine_err!(SOURCE, "Invalid SPIR-V in '{}': {}", path.display(), e))?;
        let info = vk::ShaderModuleCreateInfo::default().code(&code);

        // SAFETY: code is validated, 4-byte aligned SPIR-V
        unsafe {
            self.device
                .create_shader_module(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create shader module '{}': {:?}", path.display(), e))
        }
    }

    fn create_set_layout(&self, desc: &PipelineDesc) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .descriptor_bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(descriptor_type_to_vk(binding.descriptor_type))
                    .descriptor_count(1)
                    .stage_flags(shader_stages_to_vk(binding.stages))
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        // SAFETY: valid device
        unsafe {
            self.device
                .create_descriptor_set_layout(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e))
        }
    }

    fn create_pipeline_layout(
        &self,
        desc: &PipelineDesc,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<vk::PipelineLayout> {
        let push_constant_ranges: Vec<vk::PushConstantRange> = desc
            .push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: shader_stages_to_vk(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let set_layouts = [set_layout];
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        // SAFETY: valid device and set layout
        unsafe {
            self.device
                .create_pipeline_layout(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create pipeline layout: {:?}", e))
        }
    }

    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        layout: vk::PipelineLayout,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(SHADER_ENTRY),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_layout.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: 0,
                format: format_to_vk(attribute.format),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(desc.topology))
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode_to_vk(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = blend_attachment(desc.blend);
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&color_blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .depth_stencil_state(&depth_stencil_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(from_raw(desc.render_pass.0))
            .subpass(0);

        // SAFETY: every referenced object is alive for the duration of the call
        unsafe {
            let pipelines = self
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_create_info], None)
                .map_err(|(_, e)| engine_err!(SOURCE, "Failed to create graphics pipeline '{}': {:?}", desc.name, e))?;
            pipelines
                .into_iter()
                .next()
                .ok_or_else(|| engine_err!(SOURCE, "No pipeline returned for '{}'", desc.name))
        }
    }
}

impl Drop for VulkanGraphicsDevice {
    fn drop(&mut self) {
        // SAFETY: the backend drops the device only after every object created from it
        unsafe {
            if let Ok(pool) = self.frame_pool.get_mut() {
                self.device.destroy_command_pool(*pool, None);
            }
            if let Ok(pool) = self.one_time_pool.get_mut() {
                self.device.destroy_command_pool(*pool, None);
            }
            self.device.destroy_device(None);
        }
    }
}

impl GraphicsDevice for VulkanGraphicsDevice {
    // ===== DEVICE =====

    fn queue_family_indices(&self) -> QueueFamilyIndices {
        self.families
    }

    fn wait_idle(&self) -> Result<()> {
        let _queue = self.queue()?;
        // SAFETY: queues are locked
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!(SOURCE, "Failed to wait for device idle: {:?}", e))
        }
    }

    // ===== SURFACE / SWAPCHAIN =====

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        // SAFETY: surface and physical device are alive
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| engine_err!(SOURCE, "Failed to get surface capabilities: {:?}", e))?
        };
        Ok(capabilities_from_vk(&caps))
    }

    fn surface_formats(&self) -> Result<Vec<SurfaceFormat>> {
        // SAFETY: as above
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(|e| engine_err!(SOURCE, "Failed to query surface formats: {:?}", e))?
        };
        Ok(formats.into_iter().map(surface_format_from_vk).collect())
    }

    fn surface_present_modes(&self) -> Result<Vec<PresentMode>> {
        // SAFETY: as above
        let modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(|e| engine_err!(SOURCE, "Failed to query present modes: {:?}", e))?
        };
        Ok(modes.into_iter().filter_map(present_mode_from_vk).collect())
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<SwapchainHandle> {
        // SAFETY: as above
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(|e| engine_err!(SOURCE, "Failed to get surface capabilities: {:?}", e))?
        };

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(info.min_image_count)
            .image_format(format_to_vk(info.surface_format.format))
            .image_color_space(color_space_to_vk(info.surface_format.color_space))
            .image_extent(extent_to_vk(info.extent))
            .image_array_layers(1)
            .image_usage(image_usage_to_vk(info.usage))
            .image_sharing_mode(sharing_mode_to_vk(info.sharing_mode))
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode_to_vk(info.present_mode))
            .clipped(info.clipped)
            .old_swapchain(from_raw(info.old_swapchain.0));
        if info.sharing_mode == SharingMode::Concurrent {
            create_info = create_info.queue_family_indices(&info.queue_family_indices);
        }

        // SAFETY: surface is alive; the old swapchain (if any) is retired by this call
        let swapchain = unsafe {
            self.swapchain_loader.create_swapchain(&create_info, None).map_err(|e| {
                engine_error!(SOURCE, "Failed to create swapchain: {:?}", e);
                Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
            })?
        };
        Ok(SwapchainHandle(to_raw(swapchain)))
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> Result<Vec<ImageHandle>> {
        // SAFETY: swapchain is alive
        let images = unsafe {
            self.swapchain_loader
                .get_swapchain_images(from_raw(swapchain.0))
                .map_err(|e| engine_err!(SOURCE, "Failed to get swapchain images: {:?}", e))?
        };
        Ok(images.into_iter().map(|image| ImageHandle(to_raw(image))).collect())
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        // SAFETY: the engine destroys a swapchain once, after the device is idle
        unsafe { self.swapchain_loader.destroy_swapchain(from_raw(swapchain.0), None) };
    }

    fn acquire_next_image(&self, swapchain: SwapchainHandle, semaphore: SemaphoreHandle) -> Result<AcquiredImage> {
        // SAFETY: swapchain and semaphore are alive
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                from_raw(swapchain.0),
                u64::MAX,
                from_raw(semaphore.0),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(engine_err!(SOURCE, "Swapchain out of date during acquire"))
            }
            Err(e) => Err(engine_err!(SOURCE, "Failed to acquire next swapchain image: {:?}", e)),
        }
    }

    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait_semaphores: &[SemaphoreHandle],
    ) -> Result<PresentStatus> {
        let swapchains = [from_raw::<vk::SwapchainKHR>(swapchain.0)];
        let image_indices = [image_index];
        let waits: Vec<vk::Semaphore> = wait_semaphores.iter().map(|s| from_raw(s.0)).collect();
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let _queue = self.queue()?;
        // SAFETY: queues are locked; all handles are alive
        match unsafe { self.swapchain_loader.queue_present(self.present_queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Success),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(engine_err!(SOURCE, "Swapchain out of date during present"))
            }
            Err(e) => Err(engine_err!(SOURCE, "Failed to present swapchain image: {:?}", e)),
        }
    }

    // ===== VIEWS / SAMPLERS =====

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<ImageViewHandle> {
        let info = vk::ImageViewCreateInfo::default()
            .image(from_raw(desc.image.0))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format_to_vk(desc.format))
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_to_vk(desc.aspect),
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        // SAFETY: image is alive
        let view = unsafe {
            self.device
                .create_image_view(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create image view: {:?}", e))?
        };
        Ok(ImageViewHandle(to_raw(view)))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        // SAFETY: destroyed once, after its last use
        unsafe { self.device.destroy_image_view(from_raw(view.0), None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        let anisotropy = desc.anisotropy.map(|a| a.min(self.max_anisotropy)).filter(|&a| a > 1.0);
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(desc.max_lod)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        // SAFETY: valid device
        let sampler = unsafe {
            self.device
                .create_sampler(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create sampler: {:?}", e))?
        };
        Ok(SamplerHandle(to_raw(sampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        // SAFETY: destroyed once, after its last use
        unsafe { self.device.destroy_sampler(from_raw(sampler.0), None) };
    }

    // ===== RENDER PASSES / FRAMEBUFFERS / PIPELINES =====

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassHandle> {
        let to_vk = |attachment: &AttachmentDesc| {
            vk::AttachmentDescription::default()
                .format(format_to_vk(attachment.format))
                .samples(sample_count_to_vk(attachment.samples))
                .load_op(load_op_to_vk(attachment.load_op))
                .store_op(store_op_to_vk(attachment.store_op))
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(image_layout_to_vk(attachment.initial_layout))
                .final_layout(image_layout_to_vk(attachment.final_layout))
        };

        let mut attachments: Vec<vk::AttachmentDescription> = desc.color_attachments.iter().map(to_vk).collect();
        let color_refs: Vec<vk::AttachmentReference> = (0..desc.color_attachments.len() as u32)
            .map(|index| vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        let (stages, access) = match &desc.depth_attachment {
            Some(depth) => {
                attachments.push(to_vk(depth));
                subpass = subpass.depth_stencil_attachment(&depth_ref);
                (
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
            }
            None => (vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
        };

        // Waits for the acquire semaphore stage before writing attachments
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(access);

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        // SAFETY: valid device
        let render_pass = unsafe {
            self.device
                .create_render_pass(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create render pass: {:?}", e))?
        };
        Ok(RenderPassHandle(to_raw(render_pass)))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        // SAFETY: destroyed once, after its last use
        unsafe { self.device.destroy_render_pass(from_raw(render_pass.0), None) };
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        let attachments: Vec<vk::ImageView> = desc.attachments.iter().map(|view| from_raw(view.0)).collect();
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(from_raw(desc.render_pass.0))
            .attachments(&attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);

        // SAFETY: render pass and views are alive
        let framebuffer = unsafe {
            self.device
                .create_framebuffer(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create framebuffer: {:?}", e))?
        };
        Ok(FramebufferHandle(to_raw(framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        // SAFETY: destroyed once, after its last use
        unsafe { self.device.destroy_framebuffer(from_raw(framebuffer.0), None) };
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineObjects> {
        let vertex = self.load_shader_module(&desc.vertex_shader)?;
        let fragment = match self.load_shader_module(&desc.fragment_shader) {
            Ok(module) => module,
            Err(e) => {
                // SAFETY: module created above and unused
                unsafe { self.device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        let built = self.create_set_layout(desc).and_then(|set_layout| {
            let layout = match self.create_pipeline_layout(desc, set_layout) {
                Ok(layout) => layout,
                Err(e) => {
                    // SAFETY: created above and unused
                    unsafe { self.device.destroy_descriptor_set_layout(set_layout, None) };
                    return Err(e);
                }
            };
            match self.create_graphics_pipeline(desc, layout, vertex, fragment) {
                Ok(pipeline) => Ok(PipelineObjects {
                    pipeline: PipelineHandle(to_raw(pipeline)),
                    layout: PipelineLayoutHandle(to_raw(layout)),
                    descriptor_set_layout: DescriptorSetLayoutHandle(to_raw(set_layout)),
                }),
                Err(e) => {
                    // SAFETY: created above and unused
                    unsafe {
                        self.device.destroy_pipeline_layout(layout, None);
                        self.device.destroy_descriptor_set_layout(set_layout, None);
                    }
                    Err(e)
                }
            }
        });

        // Shader modules are not needed once the pipeline exists
        // SAFETY: modules are only referenced during pipeline creation
        unsafe {
            self.device.destroy_shader_module(vertex, None);
            self.device.destroy_shader_module(fragment, None);
        }
        built
    }

    fn destroy_pipeline(&self, objects: &PipelineObjects) {
        // SAFETY: destroyed once, after the last command buffer using it completed
        unsafe {
            self.device.destroy_pipeline(from_raw(objects.pipeline.0), None);
            self.device.destroy_pipeline_layout(from_raw(objects.layout.0), None);
            self.device
                .destroy_descriptor_set_layout(from_raw(objects.descriptor_set_layout.0), None);
        }
    }

    // ===== DESCRIPTORS =====

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<DescriptorPoolHandle> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = [
            (vk::DescriptorType::UNIFORM_BUFFER, desc.uniform_buffers),
            (vk::DescriptorType::STORAGE_BUFFER, desc.storage_buffers),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, desc.combined_image_samplers),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect();
        let info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(desc.max_sets);

        // SAFETY: valid device
        let pool = unsafe {
            self.device.create_descriptor_pool(&info, None).map_err(|e| {
                engine_error!(SOURCE, "Failed to create descriptor pool: {:?}", e);
                Error::InitializationFailed(format!("Failed to create descriptor pool: {:?}", e))
            })?
        };
        Ok(DescriptorPoolHandle(to_raw(pool)))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        // SAFETY: destroyed once, after every set from it is unused
        unsafe { self.device.destroy_descriptor_pool(from_raw(pool.0), None) };
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<()> {
        // SAFETY: the engine resets only after waiting for the device
        unsafe {
            self.device
                .reset_descriptor_pool(from_raw(pool.0), vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| engine_err!(SOURCE, "Failed to reset descriptor pool: {:?}", e))
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        let layouts = [from_raw::<vk::DescriptorSetLayout>(layout.0)];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(from_raw(pool.0))
            .set_layouts(&layouts);

        // SAFETY: pool and layout are alive
        match unsafe { self.device.allocate_descriptor_sets(&info) } {
            Ok(sets) => sets
                .first()
                .map(|&set| DescriptorSetHandle(to_raw(set)))
                .ok_or_else(|| engine_err!(SOURCE, "No descriptor set returned")),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                engine_warn!(SOURCE, "Descriptor pool exhausted");
                Err(Error::ResourceExhausted("descriptor pool".to_string()))
            }
            Err(e) => Err(engine_err!(SOURCE, "Failed to allocate descriptor set: {:?}", e)),
        }
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .filter_map(|write| match *write {
                DescriptorWrite::UniformBuffer { buffer, offset, range, .. }
                | DescriptorWrite::StorageBuffer { buffer, offset, range, .. } => Some(vk::DescriptorBufferInfo {
                    buffer: from_raw(buffer.0),
                    offset,
                    range,
                }),
                DescriptorWrite::CombinedImageSampler { .. } => None,
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .filter_map(|write| match *write {
                DescriptorWrite::CombinedImageSampler { view, sampler, .. } => Some(vk::DescriptorImageInfo {
                    sampler: from_raw(sampler.0),
                    image_view: from_raw(view.0),
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }),
                _ => None,
            })
            .collect();

        let dst_set: vk::DescriptorSet = from_raw(set.0);
        let (mut next_buffer, mut next_image) = (0, 0);
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| {
                let base = vk::WriteDescriptorSet::default().dst_set(dst_set).dst_array_element(0);
                match *write {
                    DescriptorWrite::UniformBuffer { binding, .. } => {
                        next_buffer += 1;
                        base.dst_binding(binding)
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .buffer_info(std::slice::from_ref(&buffer_infos[next_buffer - 1]))
                    }
                    DescriptorWrite::StorageBuffer { binding, .. } => {
                        next_buffer += 1;
                        base.dst_binding(binding)
                            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                            .buffer_info(std::slice::from_ref(&buffer_infos[next_buffer - 1]))
                    }
                    DescriptorWrite::CombinedImageSampler { binding, .. } => {
                        next_image += 1;
                        base.dst_binding(binding)
                            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                            .image_info(std::slice::from_ref(&image_infos[next_image - 1]))
                    }
                }
            })
            .collect();

        // SAFETY: the set is not in use by pending command buffers
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    // ===== COMMAND BUFFERS / SYNCHRONIZATION =====

    fn allocate_command_buffer(&self, kind: CommandBufferKind) -> Result<CommandBufferHandle> {
        let pool = self.pool(kind)?;
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // SAFETY: pool is locked
        let buffers = unsafe {
            self.device
                .allocate_command_buffers(&info)
                .map_err(|e| engine_err!(SOURCE, "Failed to allocate command buffer: {:?}", e))?
        };
        buffers
            .first()
            .map(|&cb| CommandBufferHandle(to_raw(cb)))
            .ok_or_else(|| engine_err!(SOURCE, "No command buffer returned"))
    }

    fn free_command_buffer(&self, kind: CommandBufferKind, command_buffer: CommandBufferHandle) {
        match self.pool(kind) {
            // SAFETY: pool is locked; the command buffer is not pending
            Ok(pool) => unsafe { self.device.free_command_buffers(*pool, &[Self::cmd(command_buffer)]) },
            Err(e) => engine_error!(SOURCE, "Command buffer leaked: {}", e),
        }
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle, one_time_submit: bool) -> Result<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::default().flags(flags);

        // SAFETY: the command buffer is not pending (guarded by its fence)
        unsafe {
            self.device
                .begin_command_buffer(Self::cmd(command_buffer), &info)
                .map_err(|e| engine_err!(SOURCE, "Failed to begin command buffer: {:?}", e))
        }
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        // SAFETY: the command buffer is recording
        unsafe {
            self.device
                .end_command_buffer(Self::cmd(command_buffer))
                .map_err(|e| engine_err!(SOURCE, "Failed to end command buffer: {:?}", e))
        }
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle> {
        // SAFETY: valid device
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create semaphore: {:?}", e))?
        };
        Ok(SemaphoreHandle(to_raw(semaphore)))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        // SAFETY: no pending operation waits on it
        unsafe { self.device.destroy_semaphore(from_raw(semaphore.0), None) };
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        // SAFETY: valid device
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create fence: {:?}", e))?
        };
        Ok(FenceHandle(to_raw(fence)))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        // SAFETY: no pending submission signals it
        unsafe { self.device.destroy_fence(from_raw(fence.0), None) };
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> Result<()> {
        // SAFETY: fence is alive
        unsafe {
            self.device
                .wait_for_fences(&[from_raw(fence.0)], true, timeout_ns)
                .map_err(|e| engine_err!(SOURCE, "Failed to wait for fence: {:?}", e))
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<()> {
        // SAFETY: fence is signaled and not pending
        unsafe {
            self.device
                .reset_fences(&[from_raw(fence.0)])
                .map_err(|e| engine_err!(SOURCE, "Failed to reset fence: {:?}", e))
        }
    }

    fn queue_submit(&self, submit: &SubmitInfo<'_>) -> Result<()> {
        if submit.wait_semaphores.len() != submit.wait_stages.len() {
            engine_bail!(
                SOURCE,
                "{} wait semaphores but {} wait stages",
                submit.wait_semaphores.len(),
                submit.wait_stages.len()
            );
        }
        let waits: Vec<vk::Semaphore> = submit.wait_semaphores.iter().map(|s| from_raw(s.0)).collect();
        let stages: Vec<vk::PipelineStageFlags> = submit.wait_stages.iter().map(|&s| stages_to_vk(s)).collect();
        let signals: Vec<vk::Semaphore> = submit.signal_semaphores.iter().map(|s| from_raw(s.0)).collect();
        let command_buffers = [Self::cmd(submit.command_buffer)];

        let info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signals);

        let _queue = self.queue()?;
        // SAFETY: queues are locked; the fence is unsignaled
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[info], from_raw(submit.fence.0))
                .map_err(|e| engine_err!(SOURCE, "Failed to submit commands to GPU queue: {:?}", e))
        }
    }

    // ===== COMMAND RECORDING =====

    fn cmd_pipeline_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(image_layout_to_vk(barrier.old_layout))
            .new_layout(image_layout_to_vk(barrier.new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(from_raw(barrier.image.0))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_to_vk(barrier.aspect),
                base_mip_level: barrier.base_mip_level,
                level_count: barrier.level_count,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(access_to_vk(barrier.src_access))
            .dst_access_mask(access_to_vk(barrier.dst_access));

        // SAFETY: the command buffer is recording
        unsafe {
            self.device.cmd_pipeline_barrier(
                Self::cmd(command_buffer),
                stages_to_vk(barrier.src_stage),
                stages_to_vk(barrier.dst_stage),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    fn cmd_copy_buffer(&self, command_buffer: CommandBufferHandle, src: BufferHandle, dst: BufferHandle, size: u64) {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        // SAFETY: the command buffer is recording
        unsafe {
            self.device
                .cmd_copy_buffer(Self::cmd(command_buffer), from_raw(src.0), from_raw(dst.0), &[region]);
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        extent: Extent2D,
    ) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 });

        // SAFETY: the command buffer is recording; dst is in TRANSFER_DST layout
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                Self::cmd(command_buffer),
                from_raw(src.0),
                from_raw(dst.0),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn cmd_blit_image(&self, command_buffer: CommandBufferHandle, image: ImageHandle, region: &BlitRegion) {
        let corner = |extent: Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let layers = |mip_level: u32| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        let blit = vk::ImageBlit::default()
            .src_subresource(layers(region.src_mip_level))
            .src_offsets([vk::Offset3D::default(), corner(region.src_extent)])
            .dst_subresource(layers(region.dst_mip_level))
            .dst_offsets([vk::Offset3D::default(), corner(region.dst_extent)]);

        let image: vk::Image = from_raw(image.0);
        // SAFETY: source level is TRANSFER_SRC, destination level TRANSFER_DST
        unsafe {
            self.device.cmd_blit_image(
                Self::cmd(command_buffer),
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }
    }

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        let clear_values: Vec<vk::ClearValue> = begin
            .clear_values
            .iter()
            .map(|value| match *value {
                ClearValue::Color(float32) => vk::ClearValue { color: vk::ClearColorValue { float32 } },
                ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                },
            })
            .collect();
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(from_raw(begin.render_pass.0))
            .framebuffer(from_raw(begin.framebuffer.0))
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: extent_to_vk(begin.extent) })
            .clear_values(&clear_values);

        // SAFETY: the command buffer is recording outside a render pass
        unsafe {
            self.device
                .cmd_begin_render_pass(Self::cmd(command_buffer), &info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        // SAFETY: the command buffer is inside a render pass
        unsafe { self.device.cmd_end_render_pass(Self::cmd(command_buffer)) };
    }

    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.device.cmd_bind_pipeline(
                Self::cmd(command_buffer),
                vk::PipelineBindPoint::GRAPHICS,
                from_raw(pipeline.0),
            );
        }
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        // SAFETY: the command buffer is recording
        unsafe { self.device.cmd_set_viewport(Self::cmd(command_buffer), 0, &[vk_viewport]) };
    }

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &Rect2D) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D { x: scissor.x, y: scissor.y },
            extent: vk::Extent2D { width: scissor.width, height: scissor.height },
        };
        // SAFETY: the command buffer is recording
        unsafe { self.device.cmd_set_scissor(Self::cmd(command_buffer), 0, &[rect]) };
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: CommandBufferHandle, buffer: BufferHandle, offset: u64) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(Self::cmd(command_buffer), 0, &[from_raw(buffer.0)], &[offset]);
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.device.cmd_bind_index_buffer(
                Self::cmd(command_buffer),
                from_raw(buffer.0),
                offset,
                index_type_to_vk(index_type),
            );
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                Self::cmd(command_buffer),
                vk::PipelineBindPoint::GRAPHICS,
                from_raw(layout.0),
                0,
                &[from_raw(set.0)],
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.device.cmd_push_constants(
                Self::cmd(command_buffer),
                from_raw(layout.0),
                shader_stages_to_vk(stages),
                offset,
                data,
            );
        }
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        // SAFETY: the command buffer is inside a render pass
        unsafe {
            self.device
                .cmd_draw_indexed(Self::cmd(command_buffer), index_count, 1, first_index, vertex_offset, 0);
        }
    }

    fn cmd_draw_indexed_indirect(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        // SAFETY: the command buffer is inside a render pass
        unsafe {
            self.device.cmd_draw_indexed_indirect(
                Self::cmd(command_buffer),
                from_raw(buffer.0),
                offset,
                draw_count,
                stride,
            );
        }
    }
}
