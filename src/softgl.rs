//! A headless software implementation of [`GlContext`].
//!
//! `SoftContext` tracks every piece of state the trait exposes and keeps real
//! pixel storage per render target, so the engine (and its tests) can run
//! without a GPU. Rasterization is deliberately coarse: a draw fills the
//! clip-space bounding box of its position attribute, honoring the current
//! blend and stencil state. That is enough to make footprints, overdraw
//! accumulation and quad compositing observable.
//!
//! Shader "execution" is declaration-driven: uniform and attribute reflection
//! comes from scanning the GLSL source at link time, and the fragment stage is
//! classified as textured, constant-color or uniform-color from its
//! `gl_FragColor` assignment.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{DrawscopeError, DrawscopeResult};
use crate::gl::{
    ActiveAttrib, ActiveUniform, BlendFactor, BufferId, Capability, CompareFunc, FramebufferId,
    GlContext, PrimitiveMode, ProgramId, RenderbufferId, ShaderId, ShaderStage, StencilOp,
    TextureId, TextureTarget, UniformLocation, UniformValue, tag,
};

const MAX_TEXTURE_UNITS: u32 = 16;
const MAX_VERTEX_ATTRIBS: usize = 16;

#[derive(Clone, Copy, Default)]
struct UnitBindings {
    tex2d: Option<TextureId>,
    cube: Option<TextureId>,
}

#[derive(Clone)]
struct TextureStore {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

struct ShaderStore {
    stage: ShaderStage,
    source: String,
    compiled: bool,
}

#[derive(Clone, Debug, PartialEq)]
enum FragBehavior {
    /// Samples the 2D texture bound to the unit named by the first sampler uniform.
    Textured,
    /// Writes a constant color parsed from the source.
    Constant([f32; 4]),
    /// Writes the current value of the named vec4 uniform.
    UniformColor(String),
}

struct ProgramStore {
    attached: Vec<ShaderId>,
    linked: bool,
    uniforms: IndexMap<String, (u32, UniformValue)>,
    attribs: IndexMap<String, u32>,
    frag: FragBehavior,
}

struct FramebufferStore {
    color: Option<TextureId>,
    depth_stencil: Option<RenderbufferId>,
}

struct RenderbufferStore {
    width: u32,
    height: u32,
    with_stencil: bool,
}

/// Software rendering context with inspectable allocation/draw counters.
pub struct SoftContext {
    width: u32,
    height: u32,
    caps: [bool; 9],
    active_unit: u32,
    units: Vec<UnitBindings>,
    textures: HashMap<u32, TextureStore>,
    renderbuffers: HashMap<u32, RenderbufferStore>,
    framebuffers: HashMap<u32, FramebufferStore>,
    bound_framebuffer: Option<FramebufferId>,
    default_color: Vec<[f32; 4]>,
    default_stencil: Vec<u8>,
    fb_stencil: HashMap<u32, Vec<u8>>,
    buffers: HashMap<u32, Vec<f32>>,
    bound_array_buffer: Option<BufferId>,
    shaders: HashMap<u32, ShaderStore>,
    programs: HashMap<u32, ProgramStore>,
    current_program: Option<ProgramId>,
    attribs: Vec<crate::gl::VertexAttribState>,
    blend: (BlendFactor, BlendFactor),
    clear_color: [f32; 4],
    stencil_func: (CompareFunc, i32, u32),
    stencil_op: (StencilOp, StencilOp, StencilOp),
    next_id: u32,
    allocations: usize,
    draws: usize,
}

impl SoftContext {
    pub fn new(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            caps: [false; 9],
            active_unit: 0,
            units: vec![UnitBindings::default(); MAX_TEXTURE_UNITS as usize],
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            bound_framebuffer: None,
            default_color: vec![[0.0; 4]; len],
            default_stencil: vec![0; len],
            fb_stencil: HashMap::new(),
            buffers: HashMap::new(),
            bound_array_buffer: None,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            current_program: None,
            attribs: vec![default_attrib(); MAX_VERTEX_ATTRIBS],
            blend: (BlendFactor::One, BlendFactor::Zero),
            clear_color: [0.0; 4],
            stencil_func: (CompareFunc::Always, 0, 0xFF),
            stencil_op: (StencilOp::Keep, StencilOp::Keep, StencilOp::Keep),
            next_id: 1,
            allocations: 0,
            draws: 0,
        }
    }

    /// Number of storage (re)allocations performed so far. Lets tests assert
    /// that redundant resizes really are no-ops.
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    /// Number of draw calls executed so far.
    pub fn draw_count(&self) -> usize {
        self.draws
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn target_dims(&self) -> (u32, u32) {
        match self.bound_framebuffer {
            None => (self.width, self.height),
            Some(fb) => {
                let color = self
                    .framebuffers
                    .get(&fb.0)
                    .and_then(|f| f.color)
                    .and_then(|t| self.textures.get(&t.0));
                match color {
                    Some(t) => (t.width, t.height),
                    None => (0, 0),
                }
            }
        }
    }

    fn target_pixels(&self) -> Option<&Vec<[f32; 4]>> {
        match self.bound_framebuffer {
            None => Some(&self.default_color),
            Some(fb) => self
                .framebuffers
                .get(&fb.0)
                .and_then(|f| f.color)
                .and_then(|t| self.textures.get(&t.0))
                .map(|t| &t.pixels),
        }
    }

    /// Rect in pixels covered by the positions of the current draw, computed
    /// from the lowest-index enabled vertex attribute's buffer contents.
    fn draw_rect(&self, first: i32, count: i32) -> Option<(u32, u32, u32, u32)> {
        let attrib = self.attribs.iter().find(|a| a.enabled)?;
        let buffer = self.buffers.get(&attrib.buffer?.0)?;
        let comps = attrib.size.max(2) as usize;
        let stride = if attrib.stride == 0 {
            comps
        } else {
            (attrib.stride as usize) / 4
        };
        let base = (attrib.offset as usize) / 4;

        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for v in first..first + count {
            let at = base + (v as usize) * stride;
            let x = *buffer.get(at)?;
            let y = *buffer.get(at + 1)?;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let (tw, th) = self.target_dims();
        let to_px = |clip: f32, extent: u32| -> u32 {
            (((clip + 1.0) * 0.5 * extent as f32).round() as i64).clamp(0, extent as i64) as u32
        };
        let x0 = to_px(min_x, tw);
        let x1 = to_px(max_x, tw);
        let y0 = to_px(min_y, th);
        let y1 = to_px(max_y, th);
        (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
    }

    fn source_color(&self, program: ProgramId) -> SourceColor {
        let store = match self.programs.get(&program.0) {
            Some(s) => s,
            None => return SourceColor::Flat([1.0; 4]),
        };
        match &store.frag {
            FragBehavior::Constant(c) => SourceColor::Flat(*c),
            FragBehavior::UniformColor(name) => match store.uniforms.get(name) {
                Some((_, UniformValue::FloatVec4(c))) => SourceColor::Flat(*c),
                _ => SourceColor::Flat([1.0; 4]),
            },
            FragBehavior::Textured => {
                let unit = store
                    .uniforms
                    .values()
                    .find_map(|(_, v)| match v {
                        UniformValue::Sampler(u) => Some(*u as usize),
                        _ => None,
                    })
                    .unwrap_or(0);
                let tex = self
                    .units
                    .get(unit)
                    .and_then(|u| u.tex2d)
                    .and_then(|t| self.textures.get(&t.0));
                match tex {
                    Some(t) => SourceColor::Texture(t.clone()),
                    None => SourceColor::Flat([0.0; 4]),
                }
            }
        }
    }
}

enum SourceColor {
    Flat([f32; 4]),
    Texture(TextureStore),
}

fn default_attrib() -> crate::gl::VertexAttribState {
    crate::gl::VertexAttribState {
        enabled: false,
        size: 4,
        normalized: false,
        stride: 0,
        offset: 0,
        buffer: None,
    }
}

fn cap_index(cap: Capability) -> usize {
    crate::gl::ALL_CAPABILITIES
        .iter()
        .position(|&c| c == cap)
        .unwrap_or(0)
}

fn blend_factor(factor: BlendFactor, src_a: f32) -> f32 {
    match factor {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcAlpha => src_a,
        BlendFactor::OneMinusSrcAlpha => 1.0 - src_a,
    }
}

#[allow(clippy::too_many_arguments)]
fn blit(
    color: &mut [[f32; 4]],
    stencil: &mut [u8],
    dims: (u32, u32),
    rect: (u32, u32, u32, u32),
    src: &SourceColor,
    blend: Option<(BlendFactor, BlendFactor)>,
    stencil_test: Option<((CompareFunc, i32, u32), StencilOp)>,
) {
    let (tw, _th) = dims;
    let (x0, y0, x1, y1) = rect;
    let (rw, rh) = ((x1 - x0) as f32, (y1 - y0) as f32);

    for y in y0..y1 {
        for x in x0..x1 {
            let idx = (y * tw + x) as usize;
            if idx >= color.len() {
                continue;
            }

            if let Some(((func, reference, mask), zpass)) = stencil_test {
                let sv = i32::from(stencil[idx]);
                let pass = match func {
                    CompareFunc::Always => true,
                    CompareFunc::Equal => (sv & mask as i32) == (reference & mask as i32),
                    CompareFunc::NotEqual => (sv & mask as i32) != (reference & mask as i32),
                };
                if !pass {
                    continue;
                }
                stencil[idx] = match zpass {
                    StencilOp::Keep => stencil[idx],
                    StencilOp::Replace => reference.clamp(0, 255) as u8,
                    StencilOp::Increment => stencil[idx].saturating_add(1),
                };
            }

            let s = match src {
                SourceColor::Flat(c) => *c,
                SourceColor::Texture(t) => {
                    let u = (x - x0) as f32 / rw;
                    let v = (y - y0) as f32 / rh;
                    let sx = ((u * t.width as f32) as u32).min(t.width.saturating_sub(1));
                    let sy = ((v * t.height as f32) as u32).min(t.height.saturating_sub(1));
                    t.pixels
                        .get((sy * t.width + sx) as usize)
                        .copied()
                        .unwrap_or([0.0; 4])
                }
            };

            let d = color[idx];
            color[idx] = match blend {
                None => s,
                Some((sf, df)) => {
                    let fs = blend_factor(sf, s[3]);
                    let fd = blend_factor(df, s[3]);
                    [
                        (s[0] * fs + d[0] * fd).clamp(0.0, 1.0),
                        (s[1] * fs + d[1] * fd).clamp(0.0, 1.0),
                        (s[2] * fs + d[2] * fd).clamp(0.0, 1.0),
                        (s[3] * fs + d[3] * fd).clamp(0.0, 1.0),
                    ]
                }
            };
        }
    }
}

fn uniform_decl(type_name: &str) -> (u32, UniformValue) {
    match type_name {
        "float" => (tag::FLOAT, UniformValue::Float(0.0)),
        "vec2" => (tag::FLOAT_VEC2, UniformValue::FloatVec2([0.0; 2])),
        "vec3" => (tag::FLOAT_VEC3, UniformValue::FloatVec3([0.0; 3])),
        "vec4" => (tag::FLOAT_VEC4, UniformValue::FloatVec4([0.0; 4])),
        "int" => (tag::INT, UniformValue::Int(0)),
        "ivec2" => (tag::INT_VEC2, UniformValue::IntVec2([0; 2])),
        "ivec3" => (tag::INT_VEC3, UniformValue::IntVec3([0; 3])),
        "ivec4" => (tag::INT_VEC4, UniformValue::IntVec4([0; 4])),
        "mat2" => (tag::FLOAT_MAT2, UniformValue::Mat2([0.0; 4])),
        "mat3" => (tag::FLOAT_MAT3, UniformValue::Mat3([0.0; 9])),
        "mat4" => (tag::FLOAT_MAT4, UniformValue::Mat4([0.0; 16])),
        "sampler2D" => (tag::SAMPLER_2D, UniformValue::Sampler(0)),
        "samplerCube" => (tag::SAMPLER_CUBE, UniformValue::Sampler(0)),
        // GLSL bool et al. reflect with a tag the engine does not support,
        // which is exactly what the contract-violation path needs to see.
        _ => (0x8B56, UniformValue::Int(0)),
    }
}

fn scan_decls(source: &str, keyword: &str, out: &mut Vec<(String, String)>) {
    for line in source.lines() {
        let line = line.trim().trim_end_matches(';');
        let mut parts = line.split_whitespace();
        if parts.next() != Some(keyword) {
            continue;
        }
        if let (Some(ty), Some(name)) = (parts.next(), parts.next()) {
            out.push((ty.to_string(), name.to_string()));
        }
    }
}

fn parse_frag_behavior(source: &str, uniforms: &IndexMap<String, (u32, UniformValue)>) -> FragBehavior {
    let expr = source
        .split("gl_FragColor")
        .nth(1)
        .and_then(|rest| rest.split('=').nth(1))
        .and_then(|rhs| rhs.split(';').next())
        .map(str::trim);

    let Some(expr) = expr else {
        return FragBehavior::Constant([1.0; 4]);
    };
    if expr.contains("texture2D(") {
        return FragBehavior::Textured;
    }
    if let Some(args) = expr.strip_prefix("vec4(").and_then(|e| e.strip_suffix(')')) {
        let vals: Vec<f32> = args
            .split(',')
            .filter_map(|p| p.trim().parse::<f32>().ok())
            .collect();
        if vals.len() == 4 {
            return FragBehavior::Constant([vals[0], vals[1], vals[2], vals[3]]);
        }
    }
    if uniforms.contains_key(expr) {
        return FragBehavior::UniformColor(expr.to_string());
    }
    FragBehavior::Constant([1.0; 4])
}

fn location_pack(program: ProgramId, index: usize) -> UniformLocation {
    UniformLocation((u64::from(program.0) << 32) | index as u64)
}

fn location_unpack(location: UniformLocation) -> (u32, usize) {
    ((location.0 >> 32) as u32, (location.0 & 0xFFFF_FFFF) as usize)
}

impl GlContext for SoftContext {
    fn set_capability(&mut self, cap: Capability, enabled: bool) {
        self.caps[cap_index(cap)] = enabled;
    }

    fn is_capability_enabled(&self, cap: Capability) -> bool {
        self.caps[cap_index(cap)]
    }

    fn max_texture_units(&self) -> u32 {
        MAX_TEXTURE_UNITS
    }

    fn active_texture_unit(&self) -> u32 {
        self.active_unit
    }

    fn set_active_texture_unit(&mut self, unit: u32) {
        self.active_unit = unit.min(MAX_TEXTURE_UNITS - 1);
    }

    fn texture_binding(&self, target: TextureTarget) -> Option<TextureId> {
        let unit = &self.units[self.active_unit as usize];
        match target {
            TextureTarget::Texture2d => unit.tex2d,
            TextureTarget::TextureCubeMap => unit.cube,
        }
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>) {
        let unit = &mut self.units[self.active_unit as usize];
        match target {
            TextureTarget::Texture2d => unit.tex2d = texture,
            TextureTarget::TextureCubeMap => unit.cube = texture,
        }
    }

    fn create_texture(&mut self) -> DrawscopeResult<TextureId> {
        let id = self.fresh_id();
        self.textures.insert(
            id,
            TextureStore {
                width: 0,
                height: 0,
                pixels: Vec::new(),
            },
        );
        Ok(TextureId(id))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
        for unit in &mut self.units {
            if unit.tex2d == Some(texture) {
                unit.tex2d = None;
            }
            if unit.cube == Some(texture) {
                unit.cube = None;
            }
        }
    }

    fn allocate_texture_rgba(&mut self, width: u32, height: u32) -> DrawscopeResult<()> {
        let bound = self.units[self.active_unit as usize]
            .tex2d
            .ok_or_else(|| DrawscopeError::resource("no 2D texture bound for allocation"))?;
        let store = self
            .textures
            .get_mut(&bound.0)
            .ok_or_else(|| DrawscopeError::resource("bound texture was deleted"))?;
        store.width = width;
        store.height = height;
        store.pixels = vec![[0.0; 4]; (width * height) as usize];
        self.allocations += 1;
        Ok(())
    }

    fn set_texture_linear_clamped(&mut self) {
        // Filtering has no observable effect in the software rasterizer.
    }

    fn copy_framebuffer_to_texture(&mut self, width: u32, height: u32) {
        let pixels = match self.target_pixels() {
            Some(p) => p.clone(),
            None => return,
        };
        let Some(bound) = self.units[self.active_unit as usize].tex2d else {
            return;
        };
        if let Some(store) = self.textures.get_mut(&bound.0) {
            store.width = width;
            store.height = height;
            store.pixels = pixels;
            store.pixels.resize((width * height) as usize, [0.0; 4]);
        }
    }

    fn create_renderbuffer(&mut self) -> DrawscopeResult<RenderbufferId> {
        let id = self.fresh_id();
        self.renderbuffers.insert(
            id,
            RenderbufferStore {
                width: 0,
                height: 0,
                with_stencil: false,
            },
        );
        Ok(RenderbufferId(id))
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.renderbuffers.remove(&renderbuffer.0);
    }

    fn allocate_depth_stencil(
        &mut self,
        renderbuffer: RenderbufferId,
        width: u32,
        height: u32,
        with_stencil: bool,
    ) -> DrawscopeResult<()> {
        let store = self
            .renderbuffers
            .get_mut(&renderbuffer.0)
            .ok_or_else(|| DrawscopeError::resource("renderbuffer was deleted"))?;
        store.width = width;
        store.height = height;
        store.with_stencil = with_stencil;
        self.allocations += 1;
        Ok(())
    }

    fn create_framebuffer(&mut self) -> DrawscopeResult<FramebufferId> {
        let id = self.fresh_id();
        self.framebuffers.insert(
            id,
            FramebufferStore {
                color: None,
                depth_stencil: None,
            },
        );
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer.0);
        self.fb_stencil.remove(&framebuffer.0);
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bound_framebuffer = framebuffer;
    }

    fn framebuffer_binding(&self) -> Option<FramebufferId> {
        self.bound_framebuffer
    }

    fn attach_color_texture(&mut self, texture: TextureId) {
        let fb = self
            .bound_framebuffer
            .expect("color attachment requires a bound framebuffer");
        if let Some(store) = self.framebuffers.get_mut(&fb.0) {
            store.color = Some(texture);
        }
    }

    fn attach_depth_stencil(&mut self, renderbuffer: RenderbufferId, with_stencil: bool) {
        let fb = self
            .bound_framebuffer
            .expect("depth/stencil attachment requires a bound framebuffer");
        if let Some(store) = self.framebuffers.get_mut(&fb.0) {
            store.depth_stencil = Some(renderbuffer);
        }
        if with_stencil {
            let (w, h) = self
                .renderbuffers
                .get(&renderbuffer.0)
                .map(|r| (r.width, r.height))
                .unwrap_or((0, 0));
            self.fb_stencil.insert(fb.0, vec![0; (w * h) as usize]);
        }
    }

    fn create_buffer(&mut self) -> DrawscopeResult<BufferId> {
        let id = self.fresh_id();
        self.buffers.insert(id, Vec::new());
        Ok(BufferId(id))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer.0);
        if self.bound_array_buffer == Some(buffer) {
            self.bound_array_buffer = None;
        }
    }

    fn bind_array_buffer(&mut self, buffer: Option<BufferId>) {
        self.bound_array_buffer = buffer;
    }

    fn array_buffer_binding(&self) -> Option<BufferId> {
        self.bound_array_buffer
    }

    fn upload_array_buffer(&mut self, data: &[f32]) {
        if let Some(bound) = self.bound_array_buffer
            && let Some(store) = self.buffers.get_mut(&bound.0)
        {
            *store = data.to_vec();
        }
    }

    fn create_shader(&mut self, stage: ShaderStage) -> DrawscopeResult<ShaderId> {
        let id = self.fresh_id();
        self.shaders.insert(
            id,
            ShaderStore {
                stage,
                source: String::new(),
                compiled: false,
            },
        );
        Ok(ShaderId(id))
    }

    fn shader_source(&mut self, shader: ShaderId, source: &str) {
        if let Some(store) = self.shaders.get_mut(&shader.0) {
            store.source = source.to_string();
            store.compiled = false;
        }
    }

    fn compile_shader(&mut self, shader: ShaderId) -> DrawscopeResult<()> {
        let store = self
            .shaders
            .get_mut(&shader.0)
            .ok_or_else(|| DrawscopeError::shader("compiling a deleted shader"))?;
        if store.source.contains("FAIL_COMPILE") {
            return Err(DrawscopeError::shader("software compile rejected the source"));
        }
        store.compiled = true;
        Ok(())
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader.0);
    }

    fn create_program(&mut self) -> DrawscopeResult<ProgramId> {
        let id = self.fresh_id();
        self.programs.insert(
            id,
            ProgramStore {
                attached: Vec::new(),
                linked: false,
                uniforms: IndexMap::new(),
                attribs: IndexMap::new(),
                frag: FragBehavior::Constant([1.0; 4]),
            },
        );
        Ok(ProgramId(id))
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if let Some(store) = self.programs.get_mut(&program.0) {
            store.attached.push(shader);
        }
    }

    fn link_program(&mut self, program: ProgramId) -> DrawscopeResult<()> {
        let attached = self
            .programs
            .get(&program.0)
            .ok_or_else(|| DrawscopeError::shader("linking a deleted program"))?
            .attached
            .clone();

        let mut uniforms = IndexMap::new();
        let mut attribs = IndexMap::new();
        let mut frag = FragBehavior::Constant([1.0; 4]);
        for shader in &attached {
            let store = self
                .shaders
                .get(&shader.0)
                .ok_or_else(|| DrawscopeError::shader("attached shader was deleted"))?;
            if !store.compiled {
                return Err(DrawscopeError::shader("attached shader is not compiled"));
            }
            if store.source.contains("FAIL_LINK") {
                return Err(DrawscopeError::shader("software link rejected the program"));
            }

            let mut decls = Vec::new();
            scan_decls(&store.source, "uniform", &mut decls);
            for (ty, name) in decls {
                uniforms.entry(name).or_insert_with(|| uniform_decl(&ty));
            }

            match store.stage {
                ShaderStage::Vertex => {
                    let mut decls = Vec::new();
                    scan_decls(&store.source, "attribute", &mut decls);
                    for (_, name) in decls {
                        let next = attribs.len() as u32;
                        attribs.entry(name).or_insert(next);
                    }
                }
                ShaderStage::Fragment => {
                    frag = parse_frag_behavior(&store.source, &uniforms);
                }
            }
        }
        // A fragment stage referencing a uniform declared in its own source
        // is re-resolved now that all uniforms are known.
        if let FragBehavior::UniformColor(name) = &frag
            && !uniforms.contains_key(name)
        {
            frag = FragBehavior::Constant([1.0; 4]);
        }

        let store = self.programs.get_mut(&program.0).expect("checked above");
        store.uniforms = uniforms;
        store.attribs = attribs;
        store.frag = frag;
        store.linked = true;
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program.0);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.current_program = program;
    }

    fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    fn active_uniforms(&self, program: ProgramId) -> Vec<ActiveUniform> {
        self.programs
            .get(&program.0)
            .map(|p| {
                p.uniforms
                    .iter()
                    .map(|(name, (type_tag, _))| ActiveUniform {
                        name: name.clone(),
                        type_tag: *type_tag,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let index = self.programs.get(&program.0)?.uniforms.get_index_of(name)?;
        Some(location_pack(program, index))
    }

    fn get_uniform(&self, program: ProgramId, location: UniformLocation) -> Option<UniformValue> {
        let (prog, index) = location_unpack(location);
        debug_assert_eq!(prog, program.0, "location belongs to a different program");
        self.programs
            .get(&program.0)?
            .uniforms
            .get_index(index)
            .map(|(_, (_, value))| value.clone())
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) {
        let (prog, index) = location_unpack(location);
        debug_assert_eq!(
            self.current_program.map(|p| p.0),
            Some(prog),
            "uniform writes target the current program"
        );
        if let Some(store) = self.programs.get_mut(&prog)
            && let Some((_, (_, slot))) = store.uniforms.get_index_mut(index)
        {
            *slot = value.clone();
        }
    }

    fn active_attributes(&self, program: ProgramId) -> Vec<ActiveAttrib> {
        self.programs
            .get(&program.0)
            .map(|p| {
                p.attribs
                    .iter()
                    .map(|(name, location)| ActiveAttrib {
                        name: name.clone(),
                        location: *location,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program.0)?.attribs.get(name).copied()
    }

    fn vertex_attrib_state(&self, index: u32) -> crate::gl::VertexAttribState {
        self.attribs
            .get(index as usize)
            .copied()
            .unwrap_or_else(default_attrib)
    }

    fn set_vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        if let Some(slot) = self.attribs.get_mut(index as usize) {
            slot.size = size;
            slot.normalized = normalized;
            slot.stride = stride;
            slot.offset = offset;
            slot.buffer = self.bound_array_buffer;
        }
    }

    fn set_vertex_attrib_enabled(&mut self, index: u32, enabled: bool) {
        if let Some(slot) = self.attribs.get_mut(index as usize) {
            slot.enabled = enabled;
        }
    }

    fn set_blend_func(&mut self, src: BlendFactor, dst: BlendFactor) {
        self.blend = (src, dst);
    }

    fn blend_func(&self) -> (BlendFactor, BlendFactor) {
        self.blend
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    fn set_stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32) {
        self.stencil_func = (func, reference, mask);
    }

    fn set_stencil_op(&mut self, fail: StencilOp, zfail: StencilOp, zpass: StencilOp) {
        self.stencil_op = (fail, zfail, zpass);
    }

    fn clear(&mut self, color: bool, _depth: bool, stencil: bool) {
        let clear_rgba = self.clear_color;
        let (tw, th) = self.target_dims();
        let len = (tw * th) as usize;
        match self.bound_framebuffer {
            None => {
                if color {
                    self.default_color.fill(clear_rgba);
                }
                if stencil {
                    self.default_stencil.fill(0);
                }
            }
            Some(fb) => {
                let tex = self.framebuffers.get(&fb.0).and_then(|f| f.color);
                if color
                    && let Some(tex) = tex
                    && let Some(store) = self.textures.get_mut(&tex.0)
                {
                    store.pixels.fill(clear_rgba);
                }
                if stencil && let Some(buf) = self.fb_stencil.get_mut(&fb.0) {
                    buf.clear();
                    buf.resize(len, 0);
                }
            }
        }
    }

    fn viewport_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn draw_arrays(&mut self, _mode: PrimitiveMode, first: i32, count: i32) {
        self.draws += 1;
        let Some(program) = self.current_program else {
            return;
        };
        let Some(rect) = self.draw_rect(first, count) else {
            return;
        };
        let dims = self.target_dims();
        let src = self.source_color(program);
        let blend = self
            .is_capability_enabled(Capability::Blend)
            .then_some(self.blend);
        let stencil_test = self
            .is_capability_enabled(Capability::StencilTest)
            .then_some((self.stencil_func, self.stencil_op.2));

        let len = (dims.0 * dims.1) as usize;
        match self.bound_framebuffer {
            None => blit(
                &mut self.default_color,
                &mut self.default_stencil,
                dims,
                rect,
                &src,
                blend,
                stencil_test,
            ),
            Some(fb) => {
                let Some(tex) = self.framebuffers.get(&fb.0).and_then(|f| f.color) else {
                    return;
                };
                let Some(store) = self.textures.get_mut(&tex.0) else {
                    return;
                };
                let stencil = self.fb_stencil.entry(fb.0).or_insert_with(|| vec![0; len]);
                stencil.resize(len, 0);
                blit(&mut store.pixels, stencil, dims, rect, &src, blend, stencil_test);
            }
        }
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Vec<u8> {
        let pixels = match self.target_pixels() {
            Some(p) => p,
            None => return vec![0; (width * height * 4) as usize],
        };
        let mut out = Vec::with_capacity((width * height * 4) as usize);
        for px in pixels.iter().take((width * height) as usize) {
            for c in px {
                out.push((c * 255.0).round().clamp(0.0, 255.0) as u8);
            }
        }
        out.resize((width * height * 4) as usize, 0);
        out
    }
}
