use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use log::{debug, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowId};

use super::RenderFrame;
use crate::capture::OffscreenTarget;
use crate::gpu::{BufferId, BufferUsage, ContextGuard, GpuContext};
use crate::shader::{
    AttributeSlot, PolygonFill, PrimitiveMode, RecordedDraw, SHADER, UNIFORM_BLOCK_SIZE,
};

/// Vertex inputs declared by the shader, in location order.
const ATTRIBUTE_LOCATIONS: [u32; 3] = [0, 1, 2];

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// wgpu backend that mirrors the host buffers of a [`GpuContext`] and
/// replays the draws a [`crate::shader::ShaderProgram`] recorded.
pub struct Renderer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    depth: DepthBuffer,
    shader: wgpu::ShaderModule,
    uniform_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniforms: UniformRing,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    buffers: HashMap<BufferId, DeviceBuffer>,
    fallback_attribute: wgpu::Buffer,
    line_mode_supported: bool,
    warned_line_mode: bool,
}

impl Renderer {
    /// Initializes the GPU renderer for the provided window.
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(anyhow!("window has zero area"));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
        });
        let surface = instance.create_surface(Arc::clone(&window))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;

        let line_mode_supported = adapter
            .features()
            .contains(wgpu::Features::POLYGON_MODE_LINE);
        let required_features = if line_mode_supported {
            wgpu::Features::POLYGON_MODE_LINE
        } else {
            wgpu::Features::empty()
        };

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("meshview-device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
        };
        let (device, queue) = adapter
            .request_device(&device_descriptor)
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("surface reports no texture formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            // The frame limiter paces frames, so presentation must not block.
            present_mode: surface_caps
                .present_modes
                .iter()
                .copied()
                .find(|mode| {
                    matches!(
                        mode,
                        wgpu::PresentMode::Mailbox | wgpu::PresentMode::Immediate
                    )
                })
                .unwrap_or(wgpu::PresentMode::Fifo),
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let depth = DepthBuffer::create(&device, config.width, config.height);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("meshview-shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform-bind-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE as u64),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("meshview-pipeline-layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });

        let stride = align_to(
            UNIFORM_BLOCK_SIZE as u64,
            u64::from(device.limits().min_uniform_buffer_offset_alignment),
        );
        let uniforms = UniformRing::create(&device, &uniform_layout, stride, 16);

        // Bound to every attribute a drawable does not provide.
        let fallback_attribute = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fallback-attribute"),
            contents: bytemuck::cast_slice(&[0.0f32; 4]),
            usage: wgpu::BufferUsages::VERTEX,
        });

        if !line_mode_supported {
            warn!("adapter lacks line polygon mode; wireframes will be drawn filled");
        }

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            depth,
            shader,
            uniform_layout,
            pipeline_layout,
            uniforms,
            pipelines: HashMap::new(),
            buffers: HashMap::new(),
            fallback_attribute,
            line_mode_supported,
            warned_line_mode: false,
        })
    }

    /// Returns the identifier of the window owned by the renderer.
    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Largest buffer the device accepts; drawables are limited to it.
    pub fn max_buffer_size(&self) -> u64 {
        self.device.limits().max_buffer_size
    }

    /// Resizes the swap chain to match the new dimensions.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        self.depth = DepthBuffer::create(&self.device, new_size.width, new_size.height);
    }

    /// Uploads stale buffers, then draws `frame` to the window.
    pub fn render(
        &mut self,
        ctx: &ContextGuard<'_>,
        frame: &RenderFrame,
    ) -> Result<(), wgpu::SurfaceError> {
        self.sync_buffers(ctx.context());
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let format = self.config.format;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("meshview-encoder"),
            });
        let draws = self.prepare(frame, format);
        self.record_pass(&mut encoder, &view, &self.depth.view, frame.clear_color, &draws);
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    /// Mirrors every live host buffer onto the device and forgets freed ones.
    fn sync_buffers(&mut self, gpu: &GpuContext) {
        let mut live = Vec::new();
        gpu.for_each_buffer(|id, entry| {
            live.push(id);
            if entry.bytes.is_empty() {
                self.buffers.remove(&id);
                return;
            }
            let size = entry.bytes.len() as u64;
            let known = self
                .buffers
                .get(&id)
                .map(|existing| (existing.revision, existing.size));
            match known {
                Some((revision, _)) if revision == entry.revision => {}
                Some((_, existing_size)) if existing_size == size => {
                    if let Some(existing) = self.buffers.get_mut(&id) {
                        self.queue.write_buffer(&existing.buffer, 0, &entry.bytes);
                        existing.revision = entry.revision;
                    }
                }
                _ => {
                    let usage = match entry.usage {
                        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
                        BufferUsage::Index => wgpu::BufferUsages::INDEX,
                    } | wgpu::BufferUsages::COPY_DST;
                    let buffer =
                        self.device
                            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                                label: Some(&entry.label),
                                contents: &entry.bytes,
                                usage,
                            });
                    debug!("uploaded {} ({size} bytes)", entry.label);
                    self.buffers.insert(
                        id,
                        DeviceBuffer {
                            buffer,
                            size,
                            revision: entry.revision,
                        },
                    );
                }
            }
        });
        self.buffers.retain(|id, _| live.contains(id));
    }

    /// Creates missing pipelines and uploads one uniform block per draw.
    fn prepare<'f>(
        &mut self,
        frame: &'f RenderFrame,
        format: wgpu::TextureFormat,
    ) -> Vec<(&'f RecordedDraw, PipelineKey)> {
        let mut prepared = Vec::with_capacity(frame.draws.len());
        for draw in &frame.draws {
            if draw.element_count == 0
                || !self.buffers.contains_key(&draw.vertex_buffer)
                || !self.buffers.contains_key(&draw.index_buffer)
            {
                continue;
            }
            let key = self.pipeline_key(draw, format);
            if !self.pipelines.contains_key(&key) {
                let pipeline = self.create_pipeline(&key);
                self.pipelines.insert(key, pipeline);
            }
            prepared.push((draw, key));
        }

        self.uniforms
            .reserve(&self.device, &self.uniform_layout, prepared.len());
        let stride = self.uniforms.stride as usize;
        let mut staging = vec![0u8; prepared.len() * stride];
        for (slot, (draw, _)) in prepared.iter().enumerate() {
            let start = slot * stride;
            staging[start..start + UNIFORM_BLOCK_SIZE].copy_from_slice(draw.uniforms.as_bytes());
        }
        if !staging.is_empty() {
            self.queue.write_buffer(&self.uniforms.buffer, 0, &staging);
        }
        prepared
    }

    fn record_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        color: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        clear_color: [f32; 3],
        draws: &[(&RecordedDraw, PipelineKey)],
    ) {
        let [r, g, b] = clear_color.map(f64::from);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("main-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a: 1.0 }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for (slot, (draw, key)) in draws.iter().enumerate() {
            let (Some(vertex), Some(index), Some(pipeline)) = (
                self.buffers.get(&draw.vertex_buffer),
                self.buffers.get(&draw.index_buffer),
                self.pipelines.get(key),
            ) else {
                continue;
            };
            let offset = slot as u64 * self.uniforms.stride;
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.uniforms.bind_group, &[offset as u32]);
            for location in ATTRIBUTE_LOCATIONS {
                match draw.layout.binding_for_slot(AttributeSlot::new(location)) {
                    Some(binding) if binding.end() <= vertex.size => pass.set_vertex_buffer(
                        location,
                        vertex.buffer.slice(binding.offset..binding.end()),
                    ),
                    _ => pass.set_vertex_buffer(location, self.fallback_attribute.slice(..)),
                }
            }
            pass.set_index_buffer(index.buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..draw.element_count, 0, 0..1);
        }
    }

    fn pipeline_key(&mut self, draw: &RecordedDraw, format: wgpu::TextureFormat) -> PipelineKey {
        let mut components = [0u8; 3];
        for (slot, location) in components.iter_mut().zip(ATTRIBUTE_LOCATIONS) {
            if let Some(binding) = draw.layout.binding_for_slot(AttributeSlot::new(location)) {
                *slot = binding.components as u8;
            }
        }
        let wants_lines = draw.raster.polygon == PolygonFill::Line;
        if wants_lines && !self.line_mode_supported && !self.warned_line_mode {
            warn!("line polygon mode unavailable, drawing filled");
            self.warned_line_mode = true;
        }
        PipelineKey {
            components,
            lines: draw.mode == PrimitiveMode::Lines,
            polygon_line: wants_lines && self.line_mode_supported,
            cull_back_faces: draw.raster.cull_back_faces,
            format,
        }
    }

    fn create_pipeline(&self, key: &PipelineKey) -> wgpu::RenderPipeline {
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = ATTRIBUTE_LOCATIONS
            .iter()
            .zip(key.components)
            .map(|(&location, components)| {
                [wgpu::VertexAttribute {
                    format: vertex_format(components),
                    offset: 0,
                    shader_location: location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = attributes
            .iter()
            .zip(key.components)
            .map(|(attribute, components)| {
                if components == 0 {
                    wgpu::VertexBufferLayout {
                        array_stride: 0,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: attribute,
                    }
                } else {
                    wgpu::VertexBufferLayout {
                        array_stride: u64::from(components) * std::mem::size_of::<f32>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: attribute,
                    }
                }
            })
            .collect();

        debug!("creating pipeline {key:?}");
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("meshview-pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                primitive: wgpu::PrimitiveState {
                    topology: if key.lines {
                        wgpu::PrimitiveTopology::LineList
                    } else {
                        wgpu::PrimitiveTopology::TriangleList
                    },
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: key.cull_back_faces.then_some(wgpu::Face::Back),
                    polygon_mode: if key.polygon_line {
                        wgpu::PolygonMode::Line
                    } else {
                        wgpu::PolygonMode::Fill
                    },
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DepthBuffer::FORMAT,
                    depth_write_enabled: true,
                    // Wireframe overlays sit exactly on the filled surface.
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &self.shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
    }
}

impl OffscreenTarget for Renderer {
    fn size(&self) -> (u32, u32) {
        (self.size.width, self.size.height)
    }

    fn render_to_image(&mut self, ctx: &ContextGuard<'_>, frame: &RenderFrame) -> Result<RgbaImage> {
        self.sync_buffers(ctx.context());
        let (width, height) = OffscreenTarget::size(self);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth = DepthBuffer::create(&self.device, width, height);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offscreen-encoder"),
            });
        let draws = self.prepare(frame, OFFSCREEN_FORMAT);
        self.record_pass(&mut encoder, &view, &depth.view, frame.clear_color, &draws);
        self.queue.submit(std::iter::once(encoder.finish()));

        let pixels = read_texture_pixels(&self.device, &self.queue, &texture, width, height)?;
        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("read back fewer pixels than a {width}x{height} image needs"))
    }
}

/// Copies a texture into a staging buffer and strips the row padding.
fn read_texture_pixels(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    let bytes_per_pixel = 4u32;
    let unpadded_bytes_per_row = width * bytes_per_pixel;
    let padded_bytes_per_row =
        align_to(u64::from(unpadded_bytes_per_row), u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT))
            as u32;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback-staging"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback-encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .context("failed to poll device")?;
    rx.recv()
        .context("readback callback was dropped")?
        .context("failed to map readback buffer")?;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    for row in 0..height {
        let start = (row * padded_bytes_per_row) as usize;
        pixels.extend_from_slice(&mapped[start..start + unpadded_bytes_per_row as usize]);
    }
    drop(mapped);
    staging.unmap();
    Ok(pixels)
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment.max(1)) * alignment.max(1)
}

fn vertex_format(components: u8) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        4 => wgpu::VertexFormat::Float32x4,
        _ => wgpu::VertexFormat::Float32x3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    /// Components per vertex for each attribute location; zero means the
    /// fallback buffer is bound instead.
    components: [u8; 3],
    lines: bool,
    polygon_line: bool,
    cull_back_faces: bool,
    format: wgpu::TextureFormat,
}

struct DeviceBuffer {
    buffer: wgpu::Buffer,
    size: u64,
    revision: u64,
}

/// One uniform block per draw, addressed with dynamic offsets.
struct UniformRing {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl UniformRing {
    fn create(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform-ring"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform-bind-group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE as u64),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            stride,
            capacity,
        }
    }

    fn reserve(&mut self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout, draws: usize) {
        if draws > self.capacity {
            *self = Self::create(device, layout, self.stride, draws.next_power_of_two());
        }
    }
}

struct DepthBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthBuffer {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

    fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth-texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}
