//! GPU Video Presentation via wgpu
//!
//! Takes converted I420 frames, uploads each plane into its own R8 texture
//! and draws a full-surface quad that does the YUV -> RGB conversion in the
//! fragment shader.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use winit::window::Window;

use crate::pixel_convert::{chroma_dimensions, ConvertedFrame};

#[derive(Debug, Error)]
pub enum PresentError {
    #[error("Surface creation failed: {0}")]
    SurfaceCreateFailed(String),
    #[error("Frame upload failed: {0}")]
    UploadFailed(String),
    #[error("Present failed: {0}")]
    PresentFailed(String),
}

/// Destination of converted frames
pub trait Presenter {
    /// Replace the displayed image. Takes effect on the next `present`.
    fn upload(&mut self, frame: &ConvertedFrame) -> Result<(), PresentError>;

    /// Show the most recently uploaded image
    fn present(&mut self) -> Result<(), PresentError>;

    /// Window was resized
    fn resize(&mut self, _width: u32, _height: u32) {}
}

// ============================================================================
// Vertex and Shader
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

const VERTICES: &[Vertex] = &[
    Vertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
    Vertex { position: [ 1.0, -1.0], tex_coords: [1.0, 1.0] },
    Vertex { position: [ 1.0,  1.0], tex_coords: [1.0, 0.0] },
    Vertex { position: [-1.0,  1.0], tex_coords: [0.0, 0.0] },
];

const INDICES: &[u16] = &[0, 1, 2, 2, 3, 0];

const SHADER_I420: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coords = in.tex_coords;
    return out;
}

@group(0) @binding(0) var t_y: texture_2d<f32>;
@group(0) @binding(1) var t_u: texture_2d<f32>;
@group(0) @binding(2) var t_v: texture_2d<f32>;
@group(0) @binding(3) var s: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let y = textureSample(t_y, s, in.tex_coords).r;
    let u = textureSample(t_u, s, in.tex_coords).r - 0.5;
    let v = textureSample(t_v, s, in.tex_coords).r - 0.5;

    // BT.709 limited range
    let y_scaled = (y - 0.0625) * 1.164;
    let r = y_scaled + 1.793 * v;
    let g = y_scaled - 0.213 * u - 0.533 * v;
    let b = y_scaled + 2.112 * u;

    return vec4<f32>(clamp(vec3<f32>(r, g, b), vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}
"#;

// ============================================================================
// GPU Presenter
// ============================================================================

struct PlaneTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

pub struct GpuPresenter {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,

    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,

    /// Y, U, V
    planes: [PlaneTexture; 3],
    has_frame: bool,
}

fn plane_texture(device: &wgpu::Device, label: &str, width: u32, height: u32) -> PlaneTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::R8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    PlaneTexture { texture, width, height }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
        },
        count: None,
    }
}

impl GpuPresenter {
    /// Create the surface for `window` and textures for a `width` x `height` video
    pub fn create(window: Arc<Window>, width: u32, height: u32) -> Result<Self, PresentError> {
        pollster::block_on(Self::create_async(window, width, height))
    }

    async fn create_async(window: Arc<Window>, width: u32, height: u32) -> Result<Self, PresentError> {
        let fail = |what: &str| PresentError::SurfaceCreateFailed(what.to_string());
        if width == 0 || height == 0 {
            return Err(fail("video has no size"));
        }

        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| PresentError::SurfaceCreateFailed(format!("Surface creation failed: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| fail("No suitable GPU adapter"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("reel_device"),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| PresentError::SurfaceCreateFailed(format!("Device request failed: {e}")))?;

        // The shader emits gamma-encoded values, so skip sRGB targets
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| fail("Surface reports no formats"))?;

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let (chroma_w, chroma_h) = chroma_dimensions(width as usize, height as usize);
        let planes = [
            plane_texture(&device, "y_texture", width, height),
            plane_texture(&device, "u_texture", chroma_w as u32, chroma_h as u32),
            plane_texture(&device, "v_texture", chroma_w as u32, chroma_h as u32),
        ];

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("i420_bind_group_layout"),
        });

        let views: Vec<wgpu::TextureView> = planes
            .iter()
            .map(|p| p.texture.create_view(&wgpu::TextureViewDescriptor::default()))
            .collect();

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("i420_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&views[1]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&views[2]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        };

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("i420_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_I420.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("i420_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("i420_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        use wgpu::util::DeviceExt;
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vertex_buffer"),
            contents: bytemuck::cast_slice(VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("index_buffer"),
            contents: bytemuck::cast_slice(INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let info = adapter.get_info();
        info!(
            adapter = %info.name,
            backend = ?info.backend,
            format = ?surface_format,
            video_width = width,
            video_height = height,
            "Created presentation surface"
        );

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            pipeline,
            bind_group,
            vertex_buffer,
            index_buffer,
            planes,
            has_frame: false,
        })
    }

    fn configure(&mut self) {
        self.surface.configure(&self.device, &self.surface_config);
    }
}

impl Presenter for GpuPresenter {
    fn upload(&mut self, frame: &ConvertedFrame) -> Result<(), PresentError> {
        let luma = &self.planes[0];
        if frame.width() != luma.width as usize || frame.height() != luma.height as usize {
            return Err(PresentError::UploadFailed(format!(
                "frame is {}x{}, textures are {}x{}",
                frame.width(),
                frame.height(),
                luma.width,
                luma.height
            )));
        }

        for (index, (plane, data)) in self.planes.iter().zip(frame.planes()).enumerate() {
            let stride = frame.stride(index);
            let needed = stride * (plane.height as usize - 1) + plane.width as usize;
            if data.len() < needed {
                return Err(PresentError::UploadFailed(format!(
                    "plane {index} holds {} bytes, needs {needed}",
                    data.len()
                )));
            }

            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &plane.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(stride as u32),
                    rows_per_image: Some(plane.height),
                },
                wgpu::Extent3d {
                    width: plane.width,
                    height: plane.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        self.has_frame = true;
        Ok(())
    }

    fn present(&mut self) -> Result<(), PresentError> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                warn!("Surface {e}, reconfiguring");
                self.configure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(PresentError::PresentFailed("out of memory".to_string()));
            }
            Err(e) => {
                warn!("Skipping present: {e}");
                return Ok(());
            }
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("present_encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if self.has_frame {
                render_pass.set_pipeline(&self.pipeline);
                render_pass.set_bind_group(0, &self.bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                render_pass.draw_indexed(0..INDICES.len() as u32, 0, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.configure();
        }
    }
}

// ============================================================================
// Headless
// ============================================================================

/// Presenter that shows nothing; keeps counts for `--headless` runs
#[derive(Debug, Default, Clone)]
pub struct NullPresenter {
    pub uploads: u64,
    pub presents: u64,
    /// pts of the frame the last `present` would have shown
    pub last_presented_pts: Option<i64>,
    uploaded_pts: Option<i64>,
}

impl NullPresenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for NullPresenter {
    fn upload(&mut self, frame: &ConvertedFrame) -> Result<(), PresentError> {
        self.uploads += 1;
        self.uploaded_pts = Some(frame.pts_us());
        Ok(())
    }

    fn present(&mut self) -> Result<(), PresentError> {
        self.presents += 1;
        self.last_presented_pts = self.uploaded_pts;
        Ok(())
    }
}
