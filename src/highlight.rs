//! Highlight visualizer: isolates one draw call. The scene as of the
//! highlighted draw becomes the backdrop, the draw itself is re-rendered in a
//! solid marker color, and every later draw stacks a dim translucent
//! silhouette so occlusion of the highlighted geometry stays readable.

use tracing::debug;

use crate::error::{DrawscopeError, DrawscopeResult};
use crate::gl::{BlendFactor, Capability};
use crate::session::{ContextHandle, ReplayCore};
use crate::snapshot::StateSnapshot;
use crate::surface::{Surface, SurfaceOptions};
use crate::trace::{Call, CallKind};
use crate::visualizer::{
    DrawCallFilter, HookKind, MutatorRegistrar, StateHash, TriggerArgs, SeekDirective, Visualizer,
};

const SOLID_VARIANT: &str = "highlight_solid";
const SOLID_FRAGMENT_SRC: &str = "precision mediump float;
void main() { gl_FragColor = vec4(1.0, 0.0, 0.8, 1.0); }
";

const DIM_VARIANT: &str = "highlight_dim";
const DIM_FRAGMENT_SRC: &str = "precision mediump float;
void main() { gl_FragColor = vec4(0.1, 0.1, 0.1, 0.4); }
";

pub struct HighlightVisualizer {
    target: Option<usize>,
    context: Option<usize>,
    backdrop: Option<Surface>,
    overlay: Option<Surface>,
    filter: DrawCallFilter,
    snapshot: StateSnapshot,
}

impl Default for HighlightVisualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl HighlightVisualizer {
    pub fn new() -> Self {
        Self {
            target: None,
            context: None,
            backdrop: None,
            overlay: None,
            filter: DrawCallFilter::default(),
            snapshot: StateSnapshot::new(),
        }
    }

    /// Call index of the currently highlighted draw, if any.
    pub fn target(&self) -> Option<usize> {
        self.target
    }

    fn retarget(&mut self, core: &ReplayCore, index: usize) -> DrawscopeResult<SeekDirective> {
        match core.trace().call(index) {
            Some(Call::DrawArrays { .. }) => {}
            _ => {
                return Err(DrawscopeError::replay(
                    "highlight target is not a draw call",
                ));
            }
        }
        self.target = Some(index);
        debug!(index, "highlight targeted draw call");
        // Replay at least past the target so the overlay gets built even when
        // the cursor currently sits before it.
        Ok(SeekDirective::Replay {
            to: core.cursor().max(index + 1),
        })
    }

    fn overlay_draw(
        &mut self,
        core: &mut ReplayCore,
        call: &Call,
        index: usize,
        target: usize,
    ) -> DrawscopeResult<()> {
        let Call::DrawArrays { mode, first, count } = *call else {
            return Ok(());
        };
        let Some(ctx) = core.current_context() else {
            return Ok(());
        };
        let Some(slot) = self.filter.current_slot() else {
            return Ok(());
        };

        let entry = core
            .context_mut(ctx)
            .ok_or_else(|| DrawscopeError::replay("highlight context was torn down"))?;

        if index == target {
            let (w, h) = entry.gl.viewport_size();
            let options = SurfaceOptions {
                depth: false,
                stencil: false,
            };
            if self.backdrop.is_none() {
                self.backdrop = Some(Surface::create(entry.gl.as_mut(), w, h, options)?);
            }
            if self.overlay.is_none() {
                self.overlay = Some(Surface::create(entry.gl.as_mut(), w, h, options)?);
            }
            self.context = Some(ctx.0);

            // Freeze the scene as of the highlighted draw.
            let backdrop = self.backdrop.as_mut().expect("created above");
            let prev_fb = entry.gl.framebuffer_binding();
            entry.gl.bind_framebuffer(None);
            backdrop.capture_texture(entry.gl.as_mut());
            entry.gl.bind_framebuffer(prev_fb);
            self.overlay.as_mut().expect("created above").clear(entry.gl.as_mut());
        }

        let Some(overlay) = self.overlay.as_mut() else {
            return Ok(());
        };
        let (gl, record) = entry
            .gl_and_record(slot)
            .ok_or_else(|| DrawscopeError::replay("draw uses an unknown program slot"))?;

        self.snapshot.backup(gl);
        let prev_fb = gl.framebuffer_binding();
        let prev_blend = gl.blend_func();

        overlay.bind(gl);
        gl.set_capability(Capability::StencilTest, false);
        gl.set_capability(Capability::DepthTest, false);
        let (name, source) = if index == target {
            gl.set_capability(Capability::Blend, false);
            (SOLID_VARIANT, SOLID_FRAGMENT_SRC)
        } else {
            gl.set_capability(Capability::Blend, true);
            gl.set_blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
            (DIM_VARIANT, DIM_FRAGMENT_SRC)
        };

        record.create_variant(gl, name, Some(source))?;
        record.draw_with_variant(gl, name, |gl| {
            gl.draw_arrays(mode, first, count);
            Ok(())
        })?;

        gl.set_blend_func(prev_blend.0, prev_blend.1);
        gl.bind_framebuffer(prev_fb);
        self.snapshot.restore(gl);
        Ok(())
    }
}

impl Visualizer for HighlightVisualizer {
    fn name(&self) -> &'static str {
        "highlight"
    }

    fn setup_mutators(&mut self, registrar: &mut MutatorRegistrar<'_>) {
        registrar.register(CallKind::UseProgram, HookKind::Post);
        registrar.register(CallKind::DrawArrays, HookKind::Wrap);
    }

    fn is_active(&self) -> bool {
        self.target.is_some()
    }

    /// Toggle semantics: triggering the already highlighted index turns the
    /// highlight off and replays the trace back to unmodified output.
    fn trigger(
        &mut self,
        core: &mut ReplayCore,
        args: &TriggerArgs,
    ) -> DrawscopeResult<SeekDirective> {
        let index = args
            .call_index
            .ok_or_else(|| DrawscopeError::replay("highlight requires a draw call index"))?;
        if self.target == Some(index) {
            self.target = None;
            debug!(index, "highlight toggled off");
            return Ok(SeekDirective::Replay { to: core.cursor() });
        }
        self.retarget(core, index)
    }

    fn apply_to_sub_step(
        &mut self,
        core: &mut ReplayCore,
        index: usize,
    ) -> DrawscopeResult<SeekDirective> {
        self.retarget(core, index)
    }

    fn deactivate(&mut self) {
        self.target = None;
    }

    fn post(&mut self, _core: &mut ReplayCore, call: &Call, _index: usize) -> DrawscopeResult<()> {
        self.filter.observe(call);
        Ok(())
    }

    fn wrap(&mut self, core: &mut ReplayCore, call: &Call, index: usize) -> DrawscopeResult<()> {
        core.execute_call(call)?;
        let Some(target) = self.target else {
            return Ok(());
        };
        if index < target {
            return Ok(());
        }
        self.overlay_draw(core, call, index, target)
    }

    fn on_contexts_reset(&mut self) {
        // The owning context is gone; drop the surfaces, don't dispose them.
        self.backdrop = None;
        self.overlay = None;
        self.context = None;
    }

    fn on_seek_end(&mut self, core: &mut ReplayCore) -> DrawscopeResult<()> {
        let (Some(ctx), Some(target)) = (self.context, self.target) else {
            return Ok(());
        };
        let handle = ContextHandle(ctx);
        let gl = core
            .gl_mut(handle)
            .ok_or_else(|| DrawscopeError::replay("highlight context was torn down"))?;
        gl.bind_framebuffer(None);
        if let Some(backdrop) = self.backdrop.as_mut() {
            backdrop.draw_texture(gl, false);
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.draw_texture(gl, true);
        }
        core.set_status(handle, format!("highlighting draw call #{target}"));
        Ok(())
    }

    fn state_hash(&self) -> String {
        let target = match self.target {
            Some(index) => index.to_string(),
            None => "none".to_string(),
        };
        StateHash::new("highlight")
            .entry("target", target)
            .entry("solid", "1.0,0.0,0.8,1.0")
            .entry("dim", "0.1,0.1,0.1,0.4")
            .finish()
    }

    fn dispose(&mut self, core: &mut ReplayCore) {
        if let Some(ctx) = self.context.take()
            && let Some(gl) = core.gl_mut(ContextHandle(ctx))
        {
            if let Some(mut backdrop) = self.backdrop.take() {
                backdrop.dispose(gl);
            }
            if let Some(mut overlay) = self.overlay.take() {
                overlay.dispose(gl);
            }
        }
        self.backdrop = None;
        self.overlay = None;
    }
}
