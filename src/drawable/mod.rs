//! Drawable objects: host-owned vertex channels packed into GPU buffers.
//!
//! A [`DrawableObject`] owns up to three per-vertex channels (coordinates,
//! colours, normals) plus an index array. Channels are packed one after the
//! other into a single vertex buffer in that fixed order, skipping the ones
//! that are absent, so the buffer's size depends on which channels the
//! shader actually consumes.
//!
//! Geometry comes from the [`Geometry`] variants in [`axis`] and [`mesh`],
//! which describe their data as a [`GeometryDescriptor`].

pub mod axis;
mod layout;
pub mod mesh;

use glam::{Mat4, Vec3};
use log::{debug, error, warn};
use thiserror::Error;

use crate::gpu::{BufferHandle, BufferUsage, ContextGuard, GpuError};
use crate::shader::{AttributeSlot, DrawCall, PrimitiveMode, ShaderContext, ShaderInterface};

pub use axis::Axis;
pub use layout::{AttributeBinding, ChannelKind, VertexLayout, COMPONENT_SIZE};
pub use mesh::Mesh;

/// Components per vertex when nothing else has been configured.
pub const DEFAULT_TUPLE_SIZE: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrawableError {
    #[error("initialize() was not called; cannot upload buffers")]
    NotInitialized,
    #[error("tuple size must be between 1 and 4, got {0}")]
    TupleSize(usize),
    #[error("{kind:?} channel holds {actual} floats, expected {expected}")]
    ChannelLength {
        kind: ChannelKind,
        expected: usize,
        actual: usize,
    },
    #[error("index array holds {actual} elements, expected {expected}")]
    IndexCount { expected: usize, actual: usize },
    #[error("index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Everything a geometry source produces for one drawable.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryDescriptor {
    pub label: String,
    pub vertex_count: usize,
    pub tuple_size: usize,
    pub coordinates: Vec<f32>,
    pub indices: Vec<u32>,
    pub colors: Option<Vec<f32>>,
    pub normals: Option<Vec<f32>>,
    pub mode: PrimitiveMode,
}

/// A source of drawable geometry.
pub trait Geometry {
    fn build(&self) -> GeometryDescriptor;
}

/// The geometry kinds the viewer knows how to show.
#[derive(Debug, Clone)]
pub enum SceneGeometry {
    Axis(Axis),
    Mesh(Mesh),
}

impl Geometry for SceneGeometry {
    fn build(&self) -> GeometryDescriptor {
        match self {
            SceneGeometry::Axis(axis) => axis.build(),
            SceneGeometry::Mesh(mesh) => mesh.build(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Channel {
    slot: AttributeSlot,
    data: Vec<f32>,
}

#[derive(Debug)]
struct GpuBuffers {
    vertex: BufferHandle,
    index: BufferHandle,
    layout: VertexLayout,
}

/// Geometry owned on the host and mirrored into a vertex and an index buffer.
///
/// Lifecycle: set channels, [`initialize`](Self::initialize) to fix the
/// counts and create buffers, [`update_buffers`](Self::update_buffers) to
/// upload, then [`draw`](Self::draw) every frame. Dropping the object frees
/// both its host arrays and its buffers.
#[derive(Debug)]
pub struct DrawableObject {
    label: String,
    vertex_count: usize,
    element_count: usize,
    tuple_size: usize,
    coordinates: Option<Channel>,
    colors: Option<Channel>,
    normals: Option<Channel>,
    indices: Vec<u32>,
    model: Mat4,
    mode: PrimitiveMode,
    buffers: Option<GpuBuffers>,
}

impl Default for DrawableObject {
    fn default() -> Self {
        Self::new("drawable")
    }
}

impl DrawableObject {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vertex_count: 0,
            element_count: 0,
            tuple_size: DEFAULT_TUPLE_SIZE,
            coordinates: None,
            colors: None,
            normals: None,
            indices: Vec::new(),
            model: Mat4::IDENTITY,
            mode: PrimitiveMode::Triangles,
            buffers: None,
        }
    }

    /// Builds, initializes and uploads a drawable from a geometry source.
    ///
    /// Channels whose attribute the shader does not declare are dropped.
    pub fn from_descriptor(
        ctx: &ContextGuard<'_>,
        interface: &ShaderInterface,
        descriptor: GeometryDescriptor,
    ) -> Result<Self, DrawableError> {
        let GeometryDescriptor {
            label,
            vertex_count,
            tuple_size,
            coordinates,
            indices,
            colors,
            normals,
            mode,
        } = descriptor;

        let mut object = Self::new(label);
        object.mode = mode;
        object.set_geometry(
            interface.attribute(ChannelKind::Coordinates.attribute_name()),
            coordinates,
            indices,
        );
        if let Some(colors) = colors {
            object.set_colors(interface.attribute(ChannelKind::Colors.attribute_name()), colors);
        }
        if let Some(normals) = normals {
            object.set_normals(interface.attribute(ChannelKind::Normals.attribute_name()), normals);
        }

        let element_count = object.indices.len();
        object.initialize(ctx, vertex_count, element_count, tuple_size)?;
        object.update_buffers(ctx)?;
        Ok(object)
    }

    /// Replaces one channel's data.
    ///
    /// Returns `false` and keeps the previous state when `slot` is `None`.
    pub fn set_channel(&mut self, kind: ChannelKind, slot: Option<AttributeSlot>, data: Vec<f32>) -> bool {
        let Some(slot) = slot else {
            debug!("{}: no shader attribute for {kind:?}, channel ignored", self.label);
            return false;
        };
        *self.channel_mut(kind) = Some(Channel { slot, data });
        true
    }

    /// Replaces the coordinates channel together with the shared index array.
    pub fn set_geometry(&mut self, slot: Option<AttributeSlot>, coordinates: Vec<f32>, indices: Vec<u32>) -> bool {
        if self.set_channel(ChannelKind::Coordinates, slot, coordinates) {
            self.indices = indices;
            true
        } else {
            false
        }
    }

    pub fn set_colors(&mut self, slot: Option<AttributeSlot>, colors: Vec<f32>) -> bool {
        self.set_channel(ChannelKind::Colors, slot, colors)
    }

    pub fn set_normals(&mut self, slot: Option<AttributeSlot>, normals: Vec<f32>) -> bool {
        self.set_channel(ChannelKind::Normals, slot, normals)
    }

    /// Fixes the counts and (re)creates the GPU buffers.
    ///
    /// Any previous buffers are released first, so a failure leaves the
    /// object not initialized.
    pub fn initialize(
        &mut self,
        ctx: &ContextGuard<'_>,
        vertex_count: usize,
        element_count: usize,
        tuple_size: usize,
    ) -> Result<(), DrawableError> {
        self.buffers = None;

        if !(1..=4).contains(&tuple_size) {
            return Err(DrawableError::TupleSize(tuple_size));
        }
        self.check_contents(vertex_count, element_count, tuple_size)?;

        let buffers = ctx
            .create_buffer(BufferUsage::Vertex, &format!("{}-vertices", self.label))
            .and_then(|vertex| {
                let index =
                    ctx.create_buffer(BufferUsage::Index, &format!("{}-indices", self.label))?;
                Ok((vertex, index))
            });
        let (vertex, index) = match buffers {
            Ok(buffers) => buffers,
            Err(err) => {
                error!("{}: failed to create GPU buffers: {err}", self.label);
                return Err(err.into());
            }
        };

        self.vertex_count = vertex_count;
        self.element_count = element_count;
        self.tuple_size = tuple_size;
        self.buffers = Some(GpuBuffers {
            vertex,
            index,
            layout: VertexLayout::default(),
        });
        Ok(())
    }

    /// Uploads the index array and every active channel.
    ///
    /// Channels and indices are checked against the initialized counts
    /// before anything is written, so a failure keeps the previous upload.
    pub fn update_buffers(&mut self, ctx: &ContextGuard<'_>) -> Result<(), DrawableError> {
        if self.buffers.is_none() {
            error!("{}: initialize() was not called, cannot upload", self.label);
            return Err(DrawableError::NotInitialized);
        }
        let checked = self.check_contents(self.vertex_count, self.element_count, self.tuple_size);
        if let Err(err) = checked {
            error!("{}: upload refused: {err}", self.label);
            return Err(err);
        }
        let layout = VertexLayout::pack(
            self.channels().map(|(kind, channel)| (kind, channel.slot)),
            self.vertex_count,
            self.tuple_size,
        );
        let Some(buffers) = self.buffers.as_mut() else {
            return Err(DrawableError::NotInitialized);
        };

        buffers
            .index
            .allocate(ctx, (self.indices.len() * std::mem::size_of::<u32>()) as u64)?;
        buffers
            .index
            .write(ctx, 0, bytemuck::cast_slice(&self.indices))?;

        buffers.vertex.allocate(ctx, layout.total_size())?;
        for binding in layout.bindings() {
            let channel = match binding.kind {
                ChannelKind::Coordinates => &self.coordinates,
                ChannelKind::Colors => &self.colors,
                ChannelKind::Normals => &self.normals,
            };
            if let Some(channel) = channel {
                buffers
                    .vertex
                    .write(ctx, binding.offset, bytemuck::cast_slice(&channel.data))?;
            }
        }

        debug!(
            "{}: uploaded {} bytes of vertices, {} indices",
            self.label,
            layout.total_size(),
            self.indices.len()
        );
        buffers.layout = layout;
        Ok(())
    }

    /// Pushes the model matrices and issues an indexed draw.
    pub fn draw<S: ShaderContext + ?Sized>(&self, shader: &mut S, mode: PrimitiveMode) {
        let Some(buffers) = self.buffers.as_ref() else {
            error!("{}: draw skipped, object is not initialized", self.label);
            return;
        };
        shader.set_named_uniform("model", self.model.into());
        shader.set_named_uniform("model_inverse", self.model.transpose().inverse().into());
        shader.draw_indexed(DrawCall {
            vertex_buffer: buffers.vertex.id(),
            index_buffer: buffers.index.id(),
            layout: &buffers.layout,
            element_count: self.element_count as u32,
            mode,
        });
    }

    /// Paints every vertex with one colour. Requires a colour channel.
    ///
    /// Only the host copy changes; call [`update_buffers`](Self::update_buffers)
    /// to make it visible.
    pub fn recolor_uniform(&mut self, color: Vec3) -> bool {
        let stride = self.tuple_size;
        let Some(colors) = self.colors.as_mut() else {
            warn!("{}: set a colour channel before recolouring", self.label);
            return false;
        };
        for vertex in colors.data.chunks_exact_mut(stride) {
            for (component, value) in vertex.iter_mut().zip(color.to_array()) {
                *component = value;
            }
        }
        true
    }

    /// Deep copy with its own GPU buffers.
    ///
    /// The copy is initialized when the source is; uploading stays with the
    /// caller.
    pub fn duplicate(&self, ctx: &ContextGuard<'_>) -> Result<Self, DrawableError> {
        let mut copy = Self {
            label: self.label.clone(),
            vertex_count: self.vertex_count,
            element_count: self.element_count,
            tuple_size: self.tuple_size,
            coordinates: self.coordinates.clone(),
            colors: self.colors.clone(),
            normals: self.normals.clone(),
            indices: self.indices.clone(),
            model: self.model,
            mode: self.mode,
            buffers: None,
        };
        if self.is_initialized() {
            copy.initialize(ctx, self.vertex_count, self.element_count, self.tuple_size)?;
        }
        Ok(copy)
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.model *= Mat4::from_translation(offset);
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.model *= Mat4::from_scale(factors);
    }

    /// Rotates by `degrees` around `axis`; a zero axis leaves the model unchanged.
    pub fn rotate(&mut self, degrees: f32, axis: Vec3) {
        if let Some(axis) = axis.try_normalize() {
            self.model *= Mat4::from_axis_angle(axis, degrees.to_radians());
        }
    }

    pub fn reset_model_matrix(&mut self) {
        self.model = Mat4::IDENTITY;
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.model
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_initialized(&self) -> bool {
        self.buffers.is_some()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    /// Number of channels that have been given data.
    pub fn active_channels(&self) -> usize {
        self.channels().count()
    }

    pub fn primitive_mode(&self) -> PrimitiveMode {
        self.mode
    }

    pub fn coordinates(&self) -> Option<&[f32]> {
        self.coordinates.as_ref().map(|channel| channel.data.as_slice())
    }

    pub fn colors(&self) -> Option<&[f32]> {
        self.colors.as_ref().map(|channel| channel.data.as_slice())
    }

    pub fn normals(&self) -> Option<&[f32]> {
        self.normals.as_ref().map(|channel| channel.data.as_slice())
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Layout of the last upload; empty before the first one.
    pub fn layout(&self) -> Option<&VertexLayout> {
        self.buffers.as_ref().map(|buffers| &buffers.layout)
    }

    pub fn vertex_buffer(&self) -> Option<&BufferHandle> {
        self.buffers.as_ref().map(|buffers| &buffers.vertex)
    }

    pub fn index_buffer(&self) -> Option<&BufferHandle> {
        self.buffers.as_ref().map(|buffers| &buffers.index)
    }

    /// Checks the channels and indices against the given counts.
    fn check_contents(
        &self,
        vertex_count: usize,
        element_count: usize,
        tuple_size: usize,
    ) -> Result<(), DrawableError> {
        let expected = vertex_count * tuple_size;
        for (kind, channel) in self.channels() {
            if channel.data.len() != expected {
                return Err(DrawableError::ChannelLength {
                    kind,
                    expected,
                    actual: channel.data.len(),
                });
            }
        }
        if self.indices.len() != element_count {
            return Err(DrawableError::IndexCount {
                expected: element_count,
                actual: self.indices.len(),
            });
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&index| index as usize >= vertex_count)
        {
            return Err(DrawableError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }
        Ok(())
    }

    fn channels(&self) -> impl Iterator<Item = (ChannelKind, &Channel)> {
        ChannelKind::ALL.into_iter().filter_map(move |kind| {
            let channel = match kind {
                ChannelKind::Coordinates => &self.coordinates,
                ChannelKind::Colors => &self.colors,
                ChannelKind::Normals => &self.normals,
            };
            channel.as_ref().map(|channel| (kind, channel))
        })
    }

    fn channel_mut(&mut self, kind: ChannelKind) -> &mut Option<Channel> {
        match kind {
            ChannelKind::Coordinates => &mut self.coordinates,
            ChannelKind::Colors => &mut self.colors,
            ChannelKind::Normals => &mut self.normals,
        }
    }
}
