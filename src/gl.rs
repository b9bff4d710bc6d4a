//! The bounded rendering-context surface the replay engine drives.
//!
//! Everything the engine touches on a live context goes through [`GlContext`]
//! so the same code runs against a real GL binding or the in-crate
//! [`SoftContext`](crate::softgl::SoftContext). Handles are opaque newtypes;
//! the engine never assumes anything about their numeric values.

use crate::error::DrawscopeResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TextureId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BufferId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FramebufferId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RenderbufferId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ShaderId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProgramId(pub u32);

/// Program-scoped uniform location, opaque to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u64);

/// The toggle states the engine snapshots and scrubs around excursions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Capability {
    Blend,
    CullFace,
    DepthTest,
    Dither,
    PolygonOffsetFill,
    SampleAlphaToCoverage,
    SampleCoverage,
    ScissorTest,
    StencilTest,
}

pub const ALL_CAPABILITIES: [Capability; 9] = [
    Capability::Blend,
    Capability::CullFace,
    Capability::DepthTest,
    Capability::Dither,
    Capability::PolygonOffsetFill,
    Capability::SampleAlphaToCoverage,
    Capability::SampleCoverage,
    Capability::ScissorTest,
    Capability::StencilTest,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2d,
    TextureCubeMap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrimitiveMode {
    Triangles,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareFunc {
    Always,
    Equal,
    NotEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StencilOp {
    Keep,
    Replace,
    Increment,
}

/// GLSL type tags as reflected by a context, numerically identical to the
/// GL enum values so a real binding can pass them straight through.
pub mod tag {
    pub const FLOAT: u32 = 0x1406;
    pub const FLOAT_VEC2: u32 = 0x8B50;
    pub const FLOAT_VEC3: u32 = 0x8B51;
    pub const FLOAT_VEC4: u32 = 0x8B52;
    pub const INT: u32 = 0x1404;
    pub const INT_VEC2: u32 = 0x8B53;
    pub const INT_VEC3: u32 = 0x8B54;
    pub const INT_VEC4: u32 = 0x8B55;
    pub const FLOAT_MAT2: u32 = 0x8B5A;
    pub const FLOAT_MAT3: u32 = 0x8B5B;
    pub const FLOAT_MAT4: u32 = 0x8B5C;
    pub const SAMPLER_2D: u32 = 0x8B5E;
    pub const SAMPLER_CUBE: u32 = 0x8B60;
}

/// The twelve GLSL uniform kinds the variant sync supports.
///
/// Both sampler tags collapse into [`UniformKind::Sampler`]; each is an
/// integer texture-unit index and syncs identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    FloatVec2,
    FloatVec3,
    FloatVec4,
    Int,
    IntVec2,
    IntVec3,
    IntVec4,
    Mat2,
    Mat3,
    Mat4,
    Sampler,
}

impl UniformKind {
    pub fn from_type_tag(type_tag: u32) -> Option<UniformKind> {
        match type_tag {
            tag::FLOAT => Some(UniformKind::Float),
            tag::FLOAT_VEC2 => Some(UniformKind::FloatVec2),
            tag::FLOAT_VEC3 => Some(UniformKind::FloatVec3),
            tag::FLOAT_VEC4 => Some(UniformKind::FloatVec4),
            tag::INT => Some(UniformKind::Int),
            tag::INT_VEC2 => Some(UniformKind::IntVec2),
            tag::INT_VEC3 => Some(UniformKind::IntVec3),
            tag::INT_VEC4 => Some(UniformKind::IntVec4),
            tag::FLOAT_MAT2 => Some(UniformKind::Mat2),
            tag::FLOAT_MAT3 => Some(UniformKind::Mat3),
            tag::FLOAT_MAT4 => Some(UniformKind::Mat4),
            tag::SAMPLER_2D | tag::SAMPLER_CUBE => Some(UniformKind::Sampler),
            _ => None,
        }
    }
}

/// A typed uniform value, read from one program and written into another.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum UniformValue {
    Float(f32),
    FloatVec2([f32; 2]),
    FloatVec3([f32; 3]),
    FloatVec4([f32; 4]),
    Int(i32),
    IntVec2([i32; 2]),
    IntVec3([i32; 3]),
    IntVec4([i32; 4]),
    Mat2([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    Sampler(i32),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::FloatVec2(_) => UniformKind::FloatVec2,
            UniformValue::FloatVec3(_) => UniformKind::FloatVec3,
            UniformValue::FloatVec4(_) => UniformKind::FloatVec4,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::IntVec2(_) => UniformKind::IntVec2,
            UniformValue::IntVec3(_) => UniformKind::IntVec3,
            UniformValue::IntVec4(_) => UniformKind::IntVec4,
            UniformValue::Mat2(_) => UniformKind::Mat2,
            UniformValue::Mat3(_) => UniformKind::Mat3,
            UniformValue::Mat4(_) => UniformKind::Mat4,
            UniformValue::Sampler(_) => UniformKind::Sampler,
        }
    }
}

/// One active uniform as reflected from a linked program.
#[derive(Clone, Debug)]
pub struct ActiveUniform {
    pub name: String,
    pub type_tag: u32,
}

/// One active vertex attribute as reflected from a linked program.
#[derive(Clone, Debug)]
pub struct ActiveAttrib {
    pub name: String,
    pub location: u32,
}

/// Pointer state of one vertex-attribute slot, as currently bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribState {
    pub enabled: bool,
    pub size: i32,
    pub normalized: bool,
    pub stride: i32,
    pub offset: i32,
    pub buffer: Option<BufferId>,
}

/// The subset of a GL-style rendering context the engine drives.
///
/// `None` for a binding means the default object (framebuffer zero, no
/// program, no texture). Resource creation returns `Err` on exhaustion; all
/// other methods mirror GL's fire-and-forget semantics.
pub trait GlContext {
    // Capability toggles.
    fn set_capability(&mut self, cap: Capability, enabled: bool);
    fn is_capability_enabled(&self, cap: Capability) -> bool;

    // Texture units. `texture_binding` reads the binding of the *active* unit.
    fn max_texture_units(&self) -> u32;
    fn active_texture_unit(&self) -> u32;
    fn set_active_texture_unit(&mut self, unit: u32);
    fn texture_binding(&self, target: TextureTarget) -> Option<TextureId>;
    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>);

    // Textures. Storage/parameter calls act on the 2D binding of the active unit.
    fn create_texture(&mut self) -> DrawscopeResult<TextureId>;
    fn delete_texture(&mut self, texture: TextureId);
    fn allocate_texture_rgba(&mut self, width: u32, height: u32) -> DrawscopeResult<()>;
    fn set_texture_linear_clamped(&mut self);
    fn copy_framebuffer_to_texture(&mut self, width: u32, height: u32);

    // Renderbuffers.
    fn create_renderbuffer(&mut self) -> DrawscopeResult<RenderbufferId>;
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);
    fn allocate_depth_stencil(
        &mut self,
        renderbuffer: RenderbufferId,
        width: u32,
        height: u32,
        with_stencil: bool,
    ) -> DrawscopeResult<()>;

    // Framebuffers. Attachment calls act on the currently bound framebuffer.
    fn create_framebuffer(&mut self) -> DrawscopeResult<FramebufferId>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn framebuffer_binding(&self) -> Option<FramebufferId>;
    fn attach_color_texture(&mut self, texture: TextureId);
    fn attach_depth_stencil(&mut self, renderbuffer: RenderbufferId, with_stencil: bool);

    // Array buffers.
    fn create_buffer(&mut self) -> DrawscopeResult<BufferId>;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn bind_array_buffer(&mut self, buffer: Option<BufferId>);
    fn array_buffer_binding(&self) -> Option<BufferId>;
    fn upload_array_buffer(&mut self, data: &[f32]);

    // Shaders and programs.
    fn create_shader(&mut self, stage: ShaderStage) -> DrawscopeResult<ShaderId>;
    fn shader_source(&mut self, shader: ShaderId, source: &str);
    fn compile_shader(&mut self, shader: ShaderId) -> DrawscopeResult<()>;
    fn delete_shader(&mut self, shader: ShaderId);
    fn create_program(&mut self) -> DrawscopeResult<ProgramId>;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn link_program(&mut self, program: ProgramId) -> DrawscopeResult<()>;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>);
    fn current_program(&self) -> Option<ProgramId>;

    // Program reflection. `set_uniform` writes to the currently bound program.
    fn active_uniforms(&self, program: ProgramId) -> Vec<ActiveUniform>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn get_uniform(&self, program: ProgramId, location: UniformLocation) -> Option<UniformValue>;
    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue);
    fn active_attributes(&self, program: ProgramId) -> Vec<ActiveAttrib>;
    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn vertex_attrib_state(&self, index: u32) -> VertexAttribState;
    fn set_vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        normalized: bool,
        stride: i32,
        offset: i32,
    );
    fn set_vertex_attrib_enabled(&mut self, index: u32, enabled: bool);

    // Raster state, draws and readback.
    fn set_blend_func(&mut self, src: BlendFactor, dst: BlendFactor);
    fn blend_func(&self) -> (BlendFactor, BlendFactor);
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn clear_color(&self) -> [f32; 4];
    fn set_stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32);
    fn set_stencil_op(&mut self, fail: StencilOp, zfail: StencilOp, zpass: StencilOp);
    fn clear(&mut self, color: bool, depth: bool, stencil: bool);
    fn viewport_size(&self) -> (u32, u32);
    fn draw_arrays(&mut self, mode: PrimitiveMode, first: i32, count: i32);
    fn read_pixels(&mut self, width: u32, height: u32) -> Vec<u8>;
}
