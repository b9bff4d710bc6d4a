//! Off-screen render target used to build overlays without touching the real
//! framebuffer: framebuffer + color texture + optional depth/stencil storage,
//! plus a persistent textured-quad program for compositing.

use tracing::debug;

use crate::error::DrawscopeResult;
use crate::gl::{
    BlendFactor, BufferId, Capability, FramebufferId, GlContext, PrimitiveMode, ProgramId,
    RenderbufferId, ShaderId, ShaderStage, TextureId, TextureTarget, UniformValue,
    VertexAttribState,
};
use crate::snapshot::StateSnapshot;

const QUAD_VERTEX_SRC: &str = "attribute vec2 a_position;
attribute vec2 a_uv;
varying vec2 v_uv;
void main() { v_uv = a_uv; gl_Position = vec4(a_position, 0.0, 1.0); }
";

const QUAD_FRAGMENT_SRC: &str = "precision mediump float;
varying vec2 v_uv;
uniform sampler2D u_texture;
void main() { gl_FragColor = texture2D(u_texture, v_uv); }
";

#[derive(Clone, Copy, Debug)]
pub struct SurfaceOptions {
    /// Allocate depth (and optionally stencil) storage alongside color.
    pub depth: bool,
    pub stencil: bool,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            depth: true,
            stencil: true,
        }
    }
}

/// An off-screen surface. All GPU objects are created eagerly in [`create`],
/// so binding or drawing before creation is impossible by construction.
///
/// [`create`]: Surface::create
pub struct Surface {
    width: u32,
    height: u32,
    framebuffer: FramebufferId,
    color: TextureId,
    depth_stencil: Option<RenderbufferId>,
    with_stencil: bool,
    quad_program: ProgramId,
    quad_positions: BufferId,
    quad_uvs: BufferId,
    resize_enabled: bool,
    snapshot: StateSnapshot,
}

impl Surface {
    pub fn create(
        gl: &mut dyn GlContext,
        width: u32,
        height: u32,
        options: SurfaceOptions,
    ) -> DrawscopeResult<Surface> {
        let prev_fb = gl.framebuffer_binding();
        let prev_tex = gl.texture_binding(TextureTarget::Texture2d);
        let prev_buf = gl.array_buffer_binding();

        let color = gl.create_texture()?;
        gl.bind_texture(TextureTarget::Texture2d, Some(color));
        gl.allocate_texture_rgba(width, height)?;
        gl.set_texture_linear_clamped();

        let framebuffer = gl.create_framebuffer()?;
        gl.bind_framebuffer(Some(framebuffer));
        gl.attach_color_texture(color);

        let with_stencil = options.depth && options.stencil;
        let depth_stencil = if options.depth {
            let rb = gl.create_renderbuffer()?;
            gl.allocate_depth_stencil(rb, width, height, with_stencil)?;
            gl.attach_depth_stencil(rb, with_stencil);
            Some(rb)
        } else {
            None
        };

        let quad_program = build_quad_program(gl)?;
        let quad_positions = gl.create_buffer()?;
        gl.bind_array_buffer(Some(quad_positions));
        gl.upload_array_buffer(&[
            -1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0,
        ]);
        let quad_uvs = gl.create_buffer()?;
        gl.bind_array_buffer(Some(quad_uvs));
        gl.upload_array_buffer(&[
            0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0,
        ]);

        gl.bind_array_buffer(prev_buf);
        gl.bind_texture(TextureTarget::Texture2d, prev_tex);
        gl.bind_framebuffer(prev_fb);

        debug!(width, height, "created off-screen surface");
        Ok(Surface {
            width,
            height,
            framebuffer,
            color,
            depth_stencil,
            with_stencil,
            quad_program,
            quad_positions,
            quad_uvs,
            resize_enabled: true,
            snapshot: StateSnapshot::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_texture(&self) -> TextureId {
        self.color
    }

    /// Reentrancy guard: while a multi-call seek is in flight an intermediate
    /// resize would invalidate pixels a pending composite still depends on.
    pub fn set_resize_enabled(&mut self, enabled: bool) {
        self.resize_enabled = enabled;
    }

    /// Reallocates storage in place, keeping object identities and discarding
    /// contents. Returns `false` (cheap no-op) for unchanged dimensions or
    /// while resizing is disabled.
    pub fn resize(&mut self, gl: &mut dyn GlContext, width: u32, height: u32) -> DrawscopeResult<bool> {
        if !self.resize_enabled || (width == self.width && height == self.height) {
            return Ok(false);
        }

        let prev_tex = gl.texture_binding(TextureTarget::Texture2d);
        gl.bind_texture(TextureTarget::Texture2d, Some(self.color));
        gl.allocate_texture_rgba(width, height)?;
        gl.bind_texture(TextureTarget::Texture2d, prev_tex);

        if let Some(rb) = self.depth_stencil {
            gl.allocate_depth_stencil(rb, width, height, self.with_stencil)?;
        }

        self.width = width;
        self.height = height;
        debug!(width, height, "resized off-screen surface");
        Ok(true)
    }

    /// Makes this surface the active render target.
    pub fn bind(&self, gl: &mut dyn GlContext) {
        gl.bind_framebuffer(Some(self.framebuffer));
    }

    /// Copies the pixels of the *currently bound* framebuffer into this
    /// surface's texture, preserving the surrounding texture binding.
    pub fn capture_texture(&mut self, gl: &mut dyn GlContext) {
        let prev_tex = gl.texture_binding(TextureTarget::Texture2d);
        gl.bind_texture(TextureTarget::Texture2d, Some(self.color));
        gl.copy_framebuffer_to_texture(self.width, self.height);
        gl.bind_texture(TextureTarget::Texture2d, prev_tex);
    }

    /// Clears this surface's color and depth without disturbing caller state.
    pub fn clear(&mut self, gl: &mut dyn GlContext) {
        self.snapshot.backup(gl);
        let prev_fb = gl.framebuffer_binding();
        let prev_clear = gl.clear_color();

        gl.bind_framebuffer(Some(self.framebuffer));
        gl.set_clear_color([0.0; 4]);
        gl.clear(true, true, self.with_stencil);

        gl.set_clear_color(prev_clear);
        gl.bind_framebuffer(prev_fb);
        self.snapshot.restore(gl);
    }

    /// Draws this surface's texture as a full-screen quad into the currently
    /// bound framebuffer. Every piece of state that could distort compositing
    /// is disabled for the draw; `blend` selects standard alpha-over
    /// compositing instead of a plain overwrite. All touched state is
    /// restored before returning.
    pub fn draw_texture(&mut self, gl: &mut dyn GlContext, blend: bool) {
        self.snapshot.backup(gl);
        let prev_program = gl.current_program();
        let prev_buffer = gl.array_buffer_binding();
        let prev_blend_func = gl.blend_func();

        for cap in [
            Capability::CullFace,
            Capability::DepthTest,
            Capability::Dither,
            Capability::ScissorTest,
            Capability::StencilTest,
        ] {
            gl.set_capability(cap, false);
        }
        gl.set_capability(Capability::Blend, blend);
        if blend {
            gl.set_blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
        }

        gl.use_program(Some(self.quad_program));
        gl.set_active_texture_unit(0);
        gl.bind_texture(TextureTarget::Texture2d, Some(self.color));
        if let Some(loc) = gl.uniform_location(self.quad_program, "u_texture") {
            gl.set_uniform(loc, &UniformValue::Sampler(0));
        }

        let pos_loc = gl.attrib_location(self.quad_program, "a_position").unwrap_or(0);
        let uv_loc = gl.attrib_location(self.quad_program, "a_uv").unwrap_or(1);
        let saved = [
            (pos_loc, gl.vertex_attrib_state(pos_loc)),
            (uv_loc, gl.vertex_attrib_state(uv_loc)),
        ];

        gl.bind_array_buffer(Some(self.quad_positions));
        gl.set_vertex_attrib_pointer(pos_loc, 2, false, 0, 0);
        gl.set_vertex_attrib_enabled(pos_loc, true);
        gl.bind_array_buffer(Some(self.quad_uvs));
        gl.set_vertex_attrib_pointer(uv_loc, 2, false, 0, 0);
        gl.set_vertex_attrib_enabled(uv_loc, true);

        gl.draw_arrays(PrimitiveMode::Triangles, 0, 6);

        for (loc, state) in saved {
            restore_attrib(gl, loc, state);
        }
        gl.bind_array_buffer(prev_buffer);
        gl.set_blend_func(prev_blend_func.0, prev_blend_func.1);
        gl.use_program(prev_program);
        self.snapshot.restore(gl);
    }

    /// Releases every GPU object this surface owns.
    pub fn dispose(&mut self, gl: &mut dyn GlContext) {
        gl.delete_buffer(self.quad_positions);
        gl.delete_buffer(self.quad_uvs);
        gl.delete_program(self.quad_program);
        if let Some(rb) = self.depth_stencil {
            gl.delete_renderbuffer(rb);
        }
        gl.delete_framebuffer(self.framebuffer);
        gl.delete_texture(self.color);
    }
}

fn restore_attrib(gl: &mut dyn GlContext, index: u32, state: VertexAttribState) {
    gl.bind_array_buffer(state.buffer);
    gl.set_vertex_attrib_pointer(index, state.size, state.normalized, state.stride, state.offset);
    gl.set_vertex_attrib_enabled(index, state.enabled);
}

fn build_quad_program(gl: &mut dyn GlContext) -> DrawscopeResult<ProgramId> {
    let vs = compile(gl, ShaderStage::Vertex, QUAD_VERTEX_SRC)?;
    let fs = compile(gl, ShaderStage::Fragment, QUAD_FRAGMENT_SRC)?;
    let program = gl.create_program()?;
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    let linked = gl.link_program(program);
    // Shader objects are not needed once the program is linked.
    gl.delete_shader(vs);
    gl.delete_shader(fs);
    linked.map(|_| program)
}

fn compile(gl: &mut dyn GlContext, stage: ShaderStage, source: &str) -> DrawscopeResult<ShaderId> {
    let shader = gl.create_shader(stage)?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader)?;
    Ok(shader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::softgl::SoftContext;

    #[test]
    fn repeated_resize_with_same_dimensions_is_a_noop() {
        let mut gl = SoftContext::new(8, 8);
        let mut surface = Surface::create(&mut gl, 8, 8, SurfaceOptions::default()).unwrap();
        let baseline = gl.allocation_count();

        assert!(!surface.resize(&mut gl, 8, 8).unwrap());
        assert!(!surface.resize(&mut gl, 8, 8).unwrap());
        assert_eq!(gl.allocation_count(), baseline);

        assert!(surface.resize(&mut gl, 16, 16).unwrap());
        assert!(gl.allocation_count() > baseline);
        assert_eq!(surface.width(), 16);
    }

    #[test]
    fn resize_guard_blocks_reallocation() {
        let mut gl = SoftContext::new(8, 8);
        let mut surface = Surface::create(&mut gl, 8, 8, SurfaceOptions::default()).unwrap();
        let baseline = gl.allocation_count();

        surface.set_resize_enabled(false);
        assert!(!surface.resize(&mut gl, 32, 32).unwrap());
        assert_eq!(gl.allocation_count(), baseline);
        assert_eq!(surface.width(), 8);

        surface.set_resize_enabled(true);
        assert!(surface.resize(&mut gl, 32, 32).unwrap());
    }

    #[test]
    fn create_preserves_surrounding_bindings() {
        let mut gl = SoftContext::new(4, 4);
        let tex = gl.create_texture().unwrap();
        gl.bind_texture(TextureTarget::Texture2d, Some(tex));
        let surface = Surface::create(&mut gl, 4, 4, SurfaceOptions::default()).unwrap();
        assert_eq!(gl.texture_binding(TextureTarget::Texture2d), Some(tex));
        assert_eq!(gl.framebuffer_binding(), None);
        // The surface got its own color texture, not the caller's binding.
        assert_ne!(surface.color_texture(), tex);
    }

    #[test]
    fn clear_leaves_clear_color_and_binding_alone() {
        let mut gl = SoftContext::new(4, 4);
        let mut surface = Surface::create(&mut gl, 4, 4, SurfaceOptions::default()).unwrap();
        gl.set_clear_color([0.5, 0.25, 0.0, 1.0]);
        surface.clear(&mut gl);
        assert_eq!(gl.clear_color(), [0.5, 0.25, 0.0, 1.0]);
        assert_eq!(gl.framebuffer_binding(), None);
    }

    #[test]
    fn draw_texture_composites_captured_pixels() {
        let mut gl = SoftContext::new(2, 2);
        let mut surface = Surface::create(&mut gl, 2, 2, SurfaceOptions::default()).unwrap();

        // Paint the default framebuffer, capture it, wipe it, re-composite.
        gl.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        gl.clear(true, false, false);
        surface.capture_texture(&mut gl);

        gl.set_clear_color([0.0; 4]);
        gl.clear(true, false, false);
        assert_eq!(&gl.read_pixels(2, 2)[0..4], &[0, 0, 0, 0]);

        surface.draw_texture(&mut gl, false);
        assert_eq!(&gl.read_pixels(2, 2)[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn draw_texture_restores_touched_state() {
        let mut gl = SoftContext::new(2, 2);
        let mut surface = Surface::create(&mut gl, 2, 2, SurfaceOptions::default()).unwrap();

        gl.set_capability(Capability::DepthTest, true);
        gl.set_capability(Capability::Blend, false);
        gl.set_blend_func(BlendFactor::One, BlendFactor::One);

        surface.draw_texture(&mut gl, true);

        assert!(gl.is_capability_enabled(Capability::DepthTest));
        assert!(!gl.is_capability_enabled(Capability::Blend));
        assert_eq!(gl.blend_func(), (BlendFactor::One, BlendFactor::One));
        assert_eq!(gl.current_program(), None);
    }
}
