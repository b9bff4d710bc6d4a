//! Per-program variant registry: alternate fragment stages over the original
//! vertex stage, with uniform/attribute state synchronized from the original
//! program right before each variant draw.
//!
//! Variants must be bit-compatible with the original draw's vertex inputs so
//! overlays exactly track the original silhouette; only the fragment stage's
//! color output may differ.

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::error::DrawscopeResult;
use crate::gl::{GlContext, ProgramId, ShaderId, ShaderStage, UniformKind};
use crate::session::ContextHandle;

pub struct ProgramRecord {
    context: ContextHandle,
    original: ProgramId,
    vertex_shader: ShaderId,
    fragment_source: String,
    variants: IndexMap<String, ProgramId>,
}

impl ProgramRecord {
    pub fn new(
        context: ContextHandle,
        original: ProgramId,
        vertex_shader: ShaderId,
        fragment_source: impl Into<String>,
    ) -> Self {
        Self {
            context,
            original,
            vertex_shader,
            fragment_source: fragment_source.into(),
            variants: IndexMap::new(),
        }
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn original(&self) -> ProgramId {
        self.original
    }

    pub fn variant(&self, name: &str) -> Option<ProgramId> {
        self.variants.get(name).copied()
    }

    /// Compiles and links a variant reusing the original vertex shader.
    /// Idempotent per name: a second call with an existing name is a no-op,
    /// not a re-link. `fragment_source` of `None` reuses the original
    /// fragment source verbatim.
    pub fn create_variant(
        &mut self,
        gl: &mut dyn GlContext,
        name: &str,
        fragment_source: Option<&str>,
    ) -> DrawscopeResult<ProgramId> {
        if let Some(existing) = self.variants.get(name) {
            return Ok(*existing);
        }

        let source = fragment_source.unwrap_or(&self.fragment_source);
        let frag = gl.create_shader(ShaderStage::Fragment)?;
        gl.shader_source(frag, source);
        let built = gl.compile_shader(frag).and_then(|_| {
            let program = gl.create_program()?;
            gl.attach_shader(program, self.vertex_shader);
            gl.attach_shader(program, frag);
            gl.link_program(program)?;
            Ok(program)
        });
        // The intermediate shader object is not needed once linked.
        gl.delete_shader(frag);

        let program = built?;
        self.variants.insert(name.to_string(), program);
        debug!(?program, variant = name, original = ?self.original, "linked program variant");
        Ok(program)
    }

    /// Copies every active uniform and every enabled active attribute from
    /// the original program into the named variant.
    ///
    /// An attribute the variant's compiler optimized out is expected and
    /// silently skipped. An unsupported uniform type, or a variant name that
    /// was never created, is a visualizer defect and panics.
    pub fn sync_before_draw(&self, gl: &mut dyn GlContext, name: &str) {
        let variant = self
            .variants
            .get(name)
            .copied()
            .unwrap_or_else(|| panic!("syncing unknown program variant '{name}'"));

        let prev_program = gl.current_program();
        gl.use_program(Some(variant));
        for uniform in gl.active_uniforms(self.original) {
            let kind = UniformKind::from_type_tag(uniform.type_tag).unwrap_or_else(|| {
                panic!(
                    "unsupported uniform type 0x{:X} for '{}'",
                    uniform.type_tag, uniform.name
                )
            });
            let Some(src_loc) = gl.uniform_location(self.original, &uniform.name) else {
                continue;
            };
            let Some(value) = gl.get_uniform(self.original, src_loc) else {
                continue;
            };
            debug_assert_eq!(value.kind(), kind);
            if let Some(dst_loc) = gl.uniform_location(variant, &uniform.name) {
                gl.set_uniform(dst_loc, &value);
            }
        }
        gl.use_program(prev_program);

        let prev_buffer = gl.array_buffer_binding();
        for attrib in gl.active_attributes(self.original) {
            let state = gl.vertex_attrib_state(attrib.location);
            if !state.enabled {
                continue;
            }
            let Some(dst_loc) = gl.attrib_location(variant, &attrib.name) else {
                // Optimized out of the variant; expected, not an error.
                trace!(attrib = %attrib.name, variant = name, "attribute absent in variant");
                continue;
            };
            if dst_loc == attrib.location {
                continue;
            }
            gl.bind_array_buffer(state.buffer);
            gl.set_vertex_attrib_pointer(dst_loc, state.size, state.normalized, state.stride, state.offset);
            gl.set_vertex_attrib_enabled(dst_loc, true);
        }
        gl.bind_array_buffer(prev_buffer);
    }

    /// Runs `draw_fn` with the named variant bound, after lazily creating it
    /// (reusing the original fragment source) and syncing state. The original
    /// program binding is restored afterwards.
    pub fn draw_with_variant(
        &mut self,
        gl: &mut dyn GlContext,
        name: &str,
        draw_fn: impl FnOnce(&mut dyn GlContext) -> DrawscopeResult<()>,
    ) -> DrawscopeResult<()> {
        let variant = self.create_variant(gl, name, None)?;
        self.sync_before_draw(gl, name);
        gl.use_program(Some(variant));
        let drawn = draw_fn(gl);
        gl.use_program(Some(self.original));
        drawn
    }

    /// Deletes every variant program. The original program is not owned here.
    pub fn dispose(&mut self, gl: &mut dyn GlContext) {
        for (_, program) in self.variants.drain(..) {
            gl.delete_program(program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{PrimitiveMode, UniformValue};
    use crate::softgl::SoftContext;

    fn record_with_uniforms(gl: &mut SoftContext, frag_extra: &str) -> ProgramRecord {
        let vs = gl.create_shader(ShaderStage::Vertex).unwrap();
        gl.shader_source(
            vs,
            "attribute vec2 a_position;\nuniform mat4 u_mvp;\nvoid main() { gl_Position = vec4(a_position, 0.0, 1.0); }",
        );
        gl.compile_shader(vs).unwrap();
        let frag_src = format!(
            "{frag_extra}uniform vec4 u_color;\nvoid main() {{ gl_FragColor = u_color; }}"
        );
        let fs = gl.create_shader(ShaderStage::Fragment).unwrap();
        gl.shader_source(fs, &frag_src);
        gl.compile_shader(fs).unwrap();
        let program = gl.create_program().unwrap();
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program).unwrap();
        ProgramRecord::new(ContextHandle(0), program, vs, frag_src)
    }

    #[test]
    fn create_variant_is_idempotent_per_name() {
        let mut gl = SoftContext::new(2, 2);
        let mut record = record_with_uniforms(&mut gl, "");
        let first = record
            .create_variant(&mut gl, "mask", Some("void main() { gl_FragColor = vec4(1.0, 0.0, 1.0, 1.0); }"))
            .unwrap();
        // Second call with a different source must not re-link.
        let second = record
            .create_variant(&mut gl, "mask", Some("void main() { gl_FragColor = vec4(0.0, 0.0, 0.0, 0.0); }"))
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn sync_copies_uniform_values_into_variant() {
        let mut gl = SoftContext::new(2, 2);
        let mut record = record_with_uniforms(&mut gl, "");
        let variant = record
            .create_variant(
                &mut gl,
                "tint",
                Some("uniform vec4 u_color;\nuniform mat4 u_mvp;\nvoid main() { gl_FragColor = u_color; }"),
            )
            .unwrap();

        gl.use_program(Some(record.original()));
        let loc = gl.uniform_location(record.original(), "u_color").unwrap();
        gl.set_uniform(loc, &UniformValue::FloatVec4([0.1, 0.2, 0.3, 0.4]));
        let mvp = gl.uniform_location(record.original(), "u_mvp").unwrap();
        gl.set_uniform(mvp, &UniformValue::Mat4([2.0; 16]));

        record.sync_before_draw(&mut gl, "tint");

        let got = gl.uniform_location(variant, "u_color").unwrap();
        assert_eq!(
            gl.get_uniform(variant, got),
            Some(UniformValue::FloatVec4([0.1, 0.2, 0.3, 0.4]))
        );
        let got_mvp = gl.uniform_location(variant, "u_mvp").unwrap();
        assert_eq!(gl.get_uniform(variant, got_mvp), Some(UniformValue::Mat4([2.0; 16])));
        // Sync leaves the caller's program binding alone.
        assert_eq!(gl.current_program(), Some(record.original()));
    }

    #[test]
    fn missing_variant_attribute_is_skipped() {
        let mut gl = SoftContext::new(2, 2);
        let mut record = record_with_uniforms(&mut gl, "");
        record
            .create_variant(&mut gl, "flat", Some("void main() { gl_FragColor = vec4(1.0, 1.0, 1.0, 1.0); }"))
            .unwrap();
        let buf = gl.create_buffer().unwrap();
        gl.bind_array_buffer(Some(buf));
        gl.upload_array_buffer(&[0.0; 12]);
        gl.set_vertex_attrib_pointer(0, 2, false, 0, 0);
        gl.set_vertex_attrib_enabled(0, true);
        // The variant has no uniforms of its own and shares attrib layout;
        // sync must complete without panicking.
        record.sync_before_draw(&mut gl, "flat");
    }

    #[test]
    #[should_panic(expected = "unsupported uniform type")]
    fn unsupported_uniform_type_panics_during_sync() {
        let mut gl = SoftContext::new(2, 2);
        let mut record = record_with_uniforms(&mut gl, "uniform bool u_flag;\n");
        record.create_variant(&mut gl, "v", None).unwrap();
        record.sync_before_draw(&mut gl, "v");
    }

    #[test]
    #[should_panic(expected = "unknown program variant")]
    fn syncing_unknown_variant_panics() {
        let mut gl = SoftContext::new(2, 2);
        let record = record_with_uniforms(&mut gl, "");
        record.sync_before_draw(&mut gl, "never-created");
    }

    #[test]
    fn draw_with_variant_restores_original_binding() {
        let mut gl = SoftContext::new(2, 2);
        let mut record = record_with_uniforms(&mut gl, "");
        let buf = gl.create_buffer().unwrap();
        gl.bind_array_buffer(Some(buf));
        gl.upload_array_buffer(&[-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0]);
        gl.set_vertex_attrib_pointer(0, 2, false, 0, 0);
        gl.set_vertex_attrib_enabled(0, true);

        gl.use_program(Some(record.original()));
        record
            .draw_with_variant(&mut gl, "lazy", |gl| {
                gl.draw_arrays(PrimitiveMode::Triangles, 0, 6);
                Ok(())
            })
            .unwrap();
        assert_eq!(gl.current_program(), Some(record.original()));
        assert!(record.variant("lazy").is_some());
    }
}
