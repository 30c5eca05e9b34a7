use glam::{Mat4, Vec3};
use log::warn;

use crate::drawable::VertexLayout;
use crate::gpu::BufferId;

/// Size in bytes of the uniform block declared by [`SHADER`].
pub const UNIFORM_BLOCK_SIZE: usize = 400;

/// Shader input location of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeSlot(u32);

impl AttributeSlot {
    pub const fn new(location: u32) -> Self {
        Self(location)
    }

    pub fn location(self) -> u32 {
        self.0
    }
}

/// Type of a field inside the uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Mat4,
    Vec3,
    Float,
    Bool,
}

impl UniformKind {
    fn size(self) -> usize {
        match self {
            UniformKind::Mat4 => 64,
            UniformKind::Vec3 => 12,
            UniformKind::Float | UniformKind::Bool => 4,
        }
    }
}

/// Location of a uniform field: byte offset and type within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformSlot {
    offset: u32,
    kind: UniformKind,
}

impl UniformSlot {
    pub const fn new(offset: u32, kind: UniformKind) -> Self {
        Self { offset, kind }
    }

    pub fn offset(self) -> u32 {
        self.offset
    }

    pub fn kind(self) -> UniformKind {
        self.kind
    }
}

/// Value pushed into a uniform slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Mat4(Mat4),
    Vec3(Vec3),
    Float(f32),
    Bool(bool),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Mat4(_) => UniformKind::Mat4,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Bool(_) => UniformKind::Bool,
        }
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        UniformValue::Mat4(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

/// Names a linked shader exposes, resolved to slots.
///
/// Lookups return `None` for anything the shader does not declare, which is
/// how callers learn that an input was optimised away.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderInterface {
    attributes: Vec<(String, AttributeSlot)>,
    uniforms: Vec<(String, UniformSlot)>,
}

impl ShaderInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interface of the built-in [`SHADER`].
    pub fn standard() -> Self {
        let mut interface = Self::new()
            .with_attribute("position", 0)
            .with_attribute("color", 1)
            .with_attribute("normal", 2);
        for &(name, offset, kind) in STANDARD_UNIFORMS {
            interface = interface.with_uniform(name, offset, kind);
        }
        interface
    }

    pub fn with_attribute(mut self, name: &str, location: u32) -> Self {
        self.attributes.retain(|(existing, _)| existing != name);
        self.attributes
            .push((name.to_string(), AttributeSlot::new(location)));
        self
    }

    pub fn with_uniform(mut self, name: &str, offset: u32, kind: UniformKind) -> Self {
        self.uniforms.retain(|(existing, _)| existing != name);
        self.uniforms
            .push((name.to_string(), UniformSlot::new(offset, kind)));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<AttributeSlot> {
        self.attributes
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, slot)| *slot)
    }

    pub fn uniform(&self, name: &str) -> Option<UniformSlot> {
        self.uniforms
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, slot)| *slot)
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, AttributeSlot)> {
        self.attributes
            .iter()
            .map(|(name, slot)| (name.as_str(), *slot))
    }
}

const STANDARD_UNIFORMS: &[(&str, u32, UniformKind)] = &[
    ("model", 0, UniformKind::Mat4),
    ("model_inverse", 64, UniformKind::Mat4),
    ("view", 128, UniformKind::Mat4),
    ("view_inverse", 192, UniformKind::Mat4),
    ("projection", 256, UniformKind::Mat4),
    ("light_position", 320, UniformKind::Vec3),
    ("light_color", 336, UniformKind::Vec3),
    ("wireframe_color", 352, UniformKind::Vec3),
    ("light_ambient", 368, UniformKind::Float),
    ("light_on", 372, UniformKind::Bool),
    ("light_fixed", 376, UniformKind::Bool),
    ("smooth_on", 380, UniformKind::Bool),
    ("wireframe_on", 384, UniformKind::Bool),
];

/// Host copy of the shader's uniform block.
#[derive(Clone, PartialEq)]
pub struct UniformBlock {
    bytes: [u8; UNIFORM_BLOCK_SIZE],
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self {
            bytes: [0; UNIFORM_BLOCK_SIZE],
        }
    }
}

impl std::fmt::Debug for UniformBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformBlock")
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl UniformBlock {
    /// Writes `value` into `slot`. Mismatched types are refused.
    pub fn set(&mut self, slot: UniformSlot, value: UniformValue) -> bool {
        if slot.kind != value.kind() {
            warn!(
                "uniform at offset {} expects {:?}, got {:?}",
                slot.offset,
                slot.kind,
                value.kind()
            );
            return false;
        }
        let start = slot.offset as usize;
        let end = start + slot.kind.size();
        if end > UNIFORM_BLOCK_SIZE {
            warn!("uniform at offset {} lies outside the block", slot.offset);
            return false;
        }
        let target = &mut self.bytes[start..end];
        match value {
            UniformValue::Mat4(m) => target.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
            UniformValue::Vec3(v) => target.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Float(f) => target.copy_from_slice(&f.to_ne_bytes()),
            UniformValue::Bool(b) => target.copy_from_slice(&u32::from(b).to_ne_bytes()),
        }
        true
    }

    /// Reads back the value stored in `slot`, or `None` when the slot lies
    /// outside the block.
    pub fn get(&self, slot: UniformSlot) -> Option<UniformValue> {
        let start = slot.offset as usize;
        let raw = self.bytes.get(start..start + slot.kind.size())?;
        let floats: Vec<f32> = raw
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let value = match slot.kind {
            UniformKind::Mat4 => UniformValue::Mat4(Mat4::from_cols_slice(&floats)),
            UniformKind::Vec3 => UniformValue::Vec3(Vec3::from_slice(&floats)),
            UniformKind::Float => UniformValue::Float(floats[0]),
            UniformKind::Bool => {
                UniformValue::Bool(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) != 0)
            }
        };
        Some(value)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// How the next draws are rasterised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonFill {
    Fill,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub polygon: PolygonFill,
    pub cull_back_faces: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            polygon: PolygonFill::Fill,
            cull_back_faces: false,
        }
    }
}

/// Primitive assembly for an indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Triangles,
    Lines,
}

/// One indexed draw issued by a drawable object.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub layout: &'a VertexLayout,
    pub element_count: u32,
    pub mode: PrimitiveMode,
}

/// Receiver of uniform updates and draws.
pub trait ShaderContext {
    fn interface(&self) -> &ShaderInterface;

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue);

    fn draw_indexed(&mut self, call: DrawCall<'_>);

    /// Resolves `name` and pushes `value`; absent uniforms are reported and skipped.
    fn set_named_uniform(&mut self, name: &str, value: UniformValue) -> bool {
        match self.interface().uniform(name) {
            Some(slot) => {
                self.set_uniform(slot, value);
                true
            }
            None => {
                warn!("uniform {name} wasn't found in the shader");
                false
            }
        }
    }
}

/// A draw captured with the uniform values in effect when it was issued.
#[derive(Debug, Clone)]
pub struct RecordedDraw {
    pub uniforms: UniformBlock,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub layout: VertexLayout,
    pub element_count: u32,
    pub mode: PrimitiveMode,
    pub raster: RasterState,
}

/// Linked shader program: persistent uniform state plus the draws recorded
/// since the last [`ShaderProgram::take_draws`].
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    interface: ShaderInterface,
    uniforms: UniformBlock,
    raster: RasterState,
    draws: Vec<RecordedDraw>,
}

impl ShaderProgram {
    pub fn new(interface: ShaderInterface) -> Self {
        Self {
            interface,
            uniforms: UniformBlock::default(),
            raster: RasterState::default(),
            draws: Vec::new(),
        }
    }

    pub fn standard() -> Self {
        Self::new(ShaderInterface::standard())
    }

    pub fn uniforms(&self) -> &UniformBlock {
        &self.uniforms
    }

    /// Current value of a named uniform, if the shader declares it.
    pub fn uniform_value(&self, name: &str) -> Option<UniformValue> {
        self.interface
            .uniform(name)
            .and_then(|slot| self.uniforms.get(slot))
    }

    pub fn raster(&self) -> RasterState {
        self.raster
    }

    pub fn set_raster(&mut self, raster: RasterState) {
        self.raster = raster;
    }

    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<RecordedDraw> {
        std::mem::take(&mut self.draws)
    }
}

impl ShaderContext for ShaderProgram {
    fn interface(&self) -> &ShaderInterface {
        &self.interface
    }

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue) {
        self.uniforms.set(slot, value);
    }

    fn draw_indexed(&mut self, call: DrawCall<'_>) {
        self.draws.push(RecordedDraw {
            uniforms: self.uniforms.clone(),
            vertex_buffer: call.vertex_buffer,
            index_buffer: call.index_buffer,
            layout: call.layout.clone(),
            element_count: call.element_count,
            mode: call.mode,
            raster: self.raster,
        });
    }
}

/// WGSL source of the viewer's only program. Its uniform block matches
/// [`ShaderInterface::standard`].
pub const SHADER: &str = r#"
struct Uniforms {
    model: mat4x4<f32>,
    model_inverse: mat4x4<f32>,
    view: mat4x4<f32>,
    view_inverse: mat4x4<f32>,
    projection: mat4x4<f32>,
    light_position: vec4<f32>,
    light_color: vec4<f32>,
    wireframe_color: vec4<f32>,
    light_ambient: f32,
    light_on: u32,
    light_fixed: u32,
    smooth_on: u32,
    wireframe_on: u32,
}

@group(0) @binding(0)
var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) normal: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) view_position: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) normal: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let view_position = u.view * u.model * vec4<f32>(input.position, 1.0);
    out.clip_position = u.projection * view_position;
    out.view_position = view_position.xyz;
    out.color = input.color;
    let world_normal = (u.model_inverse * vec4<f32>(input.normal, 0.0)).xyz;
    out.normal = (u.view_inverse * vec4<f32>(world_normal, 0.0)).xyz;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let flat_normal = normalize(cross(dpdx(input.view_position), dpdy(input.view_position)));

    if (u.wireframe_on != 0u) {
        return vec4<f32>(u.wireframe_color.rgb, 1.0);
    }
    if (u.light_on == 0u) {
        return vec4<f32>(input.color, 1.0);
    }

    var normal = normalize(input.normal);
    if (u.smooth_on == 0u) {
        normal = flat_normal;
    }
    if (dot(normal, -input.view_position) < 0.0) {
        normal = -normal;
    }

    // A fixed light keeps its position relative to the viewer.
    var light_position = u.light_position.xyz;
    if (u.light_fixed == 0u) {
        light_position = (u.view * vec4<f32>(light_position, 1.0)).xyz;
    }

    let light_dir = normalize(light_position - input.view_position);
    let diffuse = max(dot(normal, light_dir), 0.0);
    let lit = (u.light_ambient + diffuse) * u.light_color.rgb * input.color;
    return vec4<f32>(lit, 1.0);
}
"#;
