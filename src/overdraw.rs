//! Overdraw visualizer: accumulates, per pixel, how many draw calls touched
//! it within the replay window, then reports the overdraw ratio and
//! optionally composites the accumulation surface over the real output.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use crate::error::{DrawscopeError, DrawscopeResult};
use crate::gl::{BlendFactor, Capability, CompareFunc, StencilOp};
use crate::session::{ContextHandle, ReplayCore};
use crate::snapshot::StateSnapshot;
use crate::surface::{Surface, SurfaceOptions};
use crate::trace::{Call, CallKind};
use crate::visualizer::{
    DrawCallFilter, HookKind, MutatorRegistrar, StateHash, TriggerArgs, SeekDirective, Visualizer,
};

/// Alpha added to the accumulation surface by each draw; the per-pixel touch
/// count is recovered as `alpha / OVERDRAW_ALPHA_STEP` on readback.
pub const OVERDRAW_ALPHA_STEP: f32 = 0.05;

const OVERDRAW_VARIANT: &str = "overdraw";
const OVERDRAW_FRAGMENT_SRC: &str = "precision mediump float;
void main() { gl_FragColor = vec4(1.0, 0.0, 0.4, 0.05); }
";

/// Result of one overdraw readback, exposed to the UI layer.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct OverdrawReport {
    /// Pixels touched by at least one draw in the window.
    pub affected_pixels: usize,
    /// Sum over affected pixels of touches beyond the first.
    pub overdraw_pixels: usize,
    /// `overdraw_pixels / affected_pixels` as a fixed-precision decimal;
    /// exactly `"0.00"` when nothing was affected.
    pub ratio: String,
}

/// Shared UI-facing state: the visibility flag (with a change generation the
/// UI can poll) and the latest report.
#[derive(Debug, Default)]
pub struct OverdrawState {
    visible: bool,
    generation: u64,
    report: Option<OverdrawReport>,
}

/// Cloneable read/write handle onto [`OverdrawState`].
#[derive(Clone, Debug, Default)]
pub struct OverdrawHandle(Rc<RefCell<OverdrawState>>);

impl OverdrawHandle {
    pub fn visible(&self) -> bool {
        self.0.borrow().visible
    }

    pub fn set_visible(&self, visible: bool) {
        let mut state = self.0.borrow_mut();
        if state.visible != visible {
            state.visible = visible;
            state.generation += 1;
        }
    }

    /// Bumps whenever the visibility flag flips; a poll-friendly change event.
    pub fn visibility_generation(&self) -> u64 {
        self.0.borrow().generation
    }

    pub fn report(&self) -> Option<OverdrawReport> {
        self.0.borrow().report.clone()
    }

    fn set_report(&self, report: OverdrawReport) {
        self.0.borrow_mut().report = Some(report);
    }
}

pub struct OverdrawVisualizer {
    active: bool,
    filter: DrawCallFilter,
    surfaces: HashMap<usize, Surface>,
    seeded: HashSet<usize>,
    snapshot: StateSnapshot,
    state: OverdrawHandle,
}

impl Default for OverdrawVisualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl OverdrawVisualizer {
    pub fn new() -> Self {
        Self {
            active: false,
            filter: DrawCallFilter::default(),
            surfaces: HashMap::new(),
            seeded: HashSet::new(),
            snapshot: StateSnapshot::new(),
            state: OverdrawHandle::default(),
        }
    }

    /// Shared handle the UI keeps to read reports and flip visibility.
    pub fn handle(&self) -> OverdrawHandle {
        self.state.clone()
    }

    /// Excludes draws issued through the given trace program slot.
    pub fn suppress_program(&mut self, program_slot: u32) {
        self.filter.suppress(program_slot);
    }

    pub fn allow_program(&mut self, program_slot: u32) {
        self.filter.allow(program_slot);
    }

    fn accumulate(&mut self, core: &mut ReplayCore, call: &Call) -> DrawscopeResult<()> {
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
            .ok_or_else(|| DrawscopeError::replay("overdraw context was torn down"))?;
        if !self.surfaces.contains_key(&ctx.0) {
            let (w, h) = entry.gl.viewport_size();
            let mut surface = Surface::create(entry.gl.as_mut(), w, h, SurfaceOptions::default())?;
            surface.clear(entry.gl.as_mut());
            // No resizes while the accumulation window is in flight.
            surface.set_resize_enabled(false);
            self.surfaces.insert(ctx.0, surface);
        }
        let surface = self.surfaces.get_mut(&ctx.0).expect("inserted above");

        let (gl, record) = entry
            .gl_and_record(slot)
            .ok_or_else(|| DrawscopeError::replay("draw uses an unknown program slot"))?;

        self.snapshot.backup(gl);
        let prev_fb = gl.framebuffer_binding();
        let prev_blend = gl.blend_func();

        surface.bind(gl);
        gl.set_capability(Capability::Blend, true);
        gl.set_blend_func(BlendFactor::One, BlendFactor::One);
        if self.seeded.insert(ctx.0) {
            // First draw in the window also seeds the touched-pixel stencil mask.
            gl.set_capability(Capability::StencilTest, true);
            gl.set_stencil_func(CompareFunc::Always, 1, 0xFF);
            gl.set_stencil_op(StencilOp::Keep, StencilOp::Keep, StencilOp::Replace);
        } else {
            gl.set_capability(Capability::StencilTest, false);
        }

        record.create_variant(gl, OVERDRAW_VARIANT, Some(OVERDRAW_FRAGMENT_SRC))?;
        record.draw_with_variant(gl, OVERDRAW_VARIANT, |gl| {
            gl.draw_arrays(mode, first, count);
            Ok(())
        })?;

        gl.set_blend_func(prev_blend.0, prev_blend.1);
        gl.bind_framebuffer(prev_fb);
        self.snapshot.restore(gl);
        Ok(())
    }

    fn read_back(&mut self, core: &mut ReplayCore, ctx: ContextHandle) -> DrawscopeResult<()> {
        let Some(surface) = self.surfaces.get_mut(&ctx.0) else {
            return Ok(());
        };
        surface.set_resize_enabled(true);
        let gl = core
            .gl_mut(ctx)
            .ok_or_else(|| DrawscopeError::replay("overdraw context was torn down"))?;

        let prev_fb = gl.framebuffer_binding();
        surface.bind(gl);
        let pixels = gl.read_pixels(surface.width(), surface.height());
        gl.bind_framebuffer(prev_fb);

        let step = OVERDRAW_ALPHA_STEP * 255.0;
        let mut affected = 0usize;
        let mut overdraw = 0usize;
        for alpha in pixels.chunks_exact(4).map(|px| px[3]) {
            let touches = (f32::from(alpha) / step).round() as usize;
            if touches > 0 {
                affected += 1;
                overdraw += touches - 1;
            }
        }
        let ratio = if affected == 0 {
            0.0
        } else {
            overdraw as f64 / affected as f64
        };
        let report = OverdrawReport {
            affected_pixels: affected,
            overdraw_pixels: overdraw,
            ratio: format!("{ratio:.2}"),
        };
        debug!(?report, %ctx, "overdraw readback");
        core.set_status(
            ctx,
            format!("overdraw ratio {} ({affected} px affected)", report.ratio),
        );
        self.state.set_report(report);

        if self.state.visible() {
            let gl = core
                .gl_mut(ctx)
                .ok_or_else(|| DrawscopeError::replay("overdraw context was torn down"))?;
            gl.bind_framebuffer(None);
            surface.draw_texture(gl, true);
        }
        Ok(())
    }
}

impl Visualizer for OverdrawVisualizer {
    fn name(&self) -> &'static str {
        "overdraw"
    }

    fn setup_mutators(&mut self, registrar: &mut MutatorRegistrar<'_>) {
        registrar.register(CallKind::UseProgram, HookKind::Post);
        registrar.register(CallKind::DrawArrays, HookKind::Replace);
        registrar.register(CallKind::DrawArrays, HookKind::Wrap);
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn trigger(
        &mut self,
        core: &mut ReplayCore,
        _args: &TriggerArgs,
    ) -> DrawscopeResult<SeekDirective> {
        if core.current_context().is_none() {
            // Nothing observed yet: abandon cleanly, leaving cursor and
            // context exactly as unmodified playback would.
            return Ok(SeekDirective::None);
        }
        self.active = true;
        self.state.set_visible(true);
        self.seeded.clear();
        Ok(SeekDirective::Replay {
            to: core.cursor(),
        })
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.state.set_visible(false);
    }

    fn post(&mut self, _core: &mut ReplayCore, call: &Call, _index: usize) -> DrawscopeResult<()> {
        self.filter.observe(call);
        Ok(())
    }

    fn replace(
        &mut self,
        _core: &mut ReplayCore,
        _call: &Call,
        _index: usize,
    ) -> DrawscopeResult<bool> {
        Ok(self.filter.should_skip())
    }

    fn wrap(&mut self, core: &mut ReplayCore, call: &Call, _index: usize) -> DrawscopeResult<()> {
        core.execute_call(call)?;
        self.accumulate(core, call)
    }

    fn on_contexts_reset(&mut self) {
        // The owning contexts are gone; ids inside are dead.
        self.surfaces.clear();
        self.seeded.clear();
    }

    fn on_seek_end(&mut self, core: &mut ReplayCore) -> DrawscopeResult<()> {
        let handles: Vec<ContextHandle> = self.surfaces.keys().map(|&c| ContextHandle(c)).collect();
        for ctx in handles {
            self.read_back(core, ctx)?;
        }
        Ok(())
    }

    fn state_hash(&self) -> String {
        let hash = StateHash::new("overdraw")
            .entry("alpha_step", OVERDRAW_ALPHA_STEP)
            .entry("visible", self.state.visible());
        self.filter.hash_into(hash).finish()
    }

    fn dispose(&mut self, core: &mut ReplayCore) {
        for (ctx, mut surface) in self.surfaces.drain() {
            if let Some(gl) = core.gl_mut(ContextHandle(ctx)) {
                surface.dispose(gl);
            }
        }
    }
}
