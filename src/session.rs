//! Replay session: owns the trace, the context arena and the registered
//! visualizers, and drives the synchronous seek loop that dispatches mutators
//! around every replayed call.
//!
//! Replay is single-threaded and cooperative. A seek is a plain loop from the
//! only checkpoint (index 0) to a target index; seeking back to 0 and forward
//! again is the sole cancellation primitive. Rewinding tears every live
//! context down and re-creates it through the factory, so trace-local slot
//! indices stay valid across arbitrarily many rewinds.

use tracing::{debug, instrument};

use crate::error::{DrawscopeError, DrawscopeResult};
use crate::gl::{GlContext, ShaderStage};
use crate::trace::{Call, StepEvent, Trace};
use crate::variant::ProgramRecord;
use crate::visualizer::{
    HookKind, MutatorRegistrar, MutatorTable, TriggerArgs, SeekDirective, Visualizer, VisualizerId,
};

/// Stable arena index of one live rendering context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub usize);

impl std::fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Materializes a live context when a context-creation call is replayed.
pub trait ContextFactory {
    fn create_context(&mut self, width: u32, height: u32) -> DrawscopeResult<Box<dyn GlContext>>;
}

impl<F> ContextFactory for F
where
    F: FnMut(u32, u32) -> DrawscopeResult<Box<dyn GlContext>>,
{
    fn create_context(&mut self, width: u32, height: u32) -> DrawscopeResult<Box<dyn GlContext>> {
        self(width, height)
    }
}

/// One live context plus everything replayed into it. The session owns all
/// per-context resources and releases them together on rewind or teardown.
pub struct ContextEntry {
    pub gl: Box<dyn GlContext>,
    programs: Vec<ProgramRecord>,
    buffers: Vec<crate::gl::BufferId>,
    status: String,
}

impl ContextEntry {
    pub fn program_record_mut(&mut self, slot: u32) -> Option<&mut ProgramRecord> {
        self.programs.get_mut(slot as usize)
    }

    pub fn program_record(&self, slot: u32) -> Option<&ProgramRecord> {
        self.programs.get(slot as usize)
    }

    /// Splits the entry so a caller can drive the context and a program
    /// record at the same time.
    pub fn gl_and_record(
        &mut self,
        slot: u32,
    ) -> Option<(&mut dyn GlContext, &mut ProgramRecord)> {
        let record = self.programs.get_mut(slot as usize)?;
        Some((self.gl.as_mut(), record))
    }
}

/// Everything a hook may touch: the trace, the cursor, the context arena and
/// per-context status strings. Visualizer bookkeeping lives one level up in
/// [`ReplaySession`] so hooks can borrow the core mutably while the session
/// holds the visualizer itself.
pub struct ReplayCore {
    trace: Trace,
    cursor: usize,
    factory: Box<dyn ContextFactory>,
    contexts: Vec<Option<ContextEntry>>,
    current: Option<ContextHandle>,
    experiment_hash: String,
}

impl ReplayCore {
    fn new(trace: Trace, factory: Box<dyn ContextFactory>) -> Self {
        Self {
            trace,
            cursor: 0,
            factory,
            contexts: Vec::new(),
            current: None,
            experiment_hash: String::new(),
        }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Index of the next call to execute.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_context(&self) -> Option<ContextHandle> {
        self.current
    }

    pub fn context_mut(&mut self, handle: ContextHandle) -> Option<&mut ContextEntry> {
        self.contexts.get_mut(handle.0).and_then(Option::as_mut)
    }

    pub fn gl_mut(&mut self, handle: ContextHandle) -> Option<&mut dyn GlContext> {
        match self.context_mut(handle) {
            Some(entry) => Some(entry.gl.as_mut()),
            None => None,
        }
    }

    /// The join key timing series are bucketed under: the sorted combination
    /// of every active visualizer's state hash at the time of the last seek.
    pub fn experiment_hash(&self) -> &str {
        &self.experiment_hash
    }

    pub fn set_status(&mut self, handle: ContextHandle, message: impl Into<String>) {
        if let Some(entry) = self.context_mut(handle) {
            entry.status = message.into();
        }
    }

    /// Human-readable per-context status line for the UI.
    pub fn status(&self, handle: ContextHandle) -> Option<&str> {
        self.contexts
            .get(handle.0)
            .and_then(Option::as_ref)
            .map(|e| e.status.as_str())
    }

    fn rewind(&mut self) {
        debug!(cursor = self.cursor, "rewinding to trace start");
        self.contexts.clear();
        self.current = None;
        self.cursor = 0;
    }

    fn current_entry_mut(&mut self) -> DrawscopeResult<&mut ContextEntry> {
        let handle = self
            .current
            .ok_or_else(|| DrawscopeError::replay("call replayed before any context creation"))?;
        self.context_mut(handle)
            .ok_or_else(|| DrawscopeError::replay("current context was torn down"))
    }

    /// Executes one call against the live context, exactly as unmodified
    /// playback would. Wrap hooks call this to re-issue the real call.
    pub fn execute_call(&mut self, call: &Call) -> DrawscopeResult<()> {
        if let Call::CreateContext { width, height } = call {
            let gl = self.factory.create_context(*width, *height)?;
            let handle = ContextHandle(self.contexts.len());
            self.contexts.push(Some(ContextEntry {
                gl,
                programs: Vec::new(),
                buffers: Vec::new(),
                status: String::new(),
            }));
            self.current = Some(handle);
            debug!(%handle, width, height, "created replay context");
            return Ok(());
        }

        let current = self.current;
        let entry = self.current_entry_mut()?;
        let gl = entry.gl.as_mut();
        match call {
            Call::CreateContext { .. } => unreachable!("handled above"),
            Call::Enable { cap } => gl.set_capability(*cap, true),
            Call::Disable { cap } => gl.set_capability(*cap, false),
            Call::CreateProgram {
                vertex_src,
                fragment_src,
            } => {
                let vs = gl.create_shader(ShaderStage::Vertex)?;
                gl.shader_source(vs, vertex_src);
                gl.compile_shader(vs)?;
                let fs = gl.create_shader(ShaderStage::Fragment)?;
                gl.shader_source(fs, fragment_src);
                let linked = gl.compile_shader(fs).and_then(|_| {
                    let program = gl.create_program()?;
                    gl.attach_shader(program, vs);
                    gl.attach_shader(program, fs);
                    gl.link_program(program)?;
                    Ok(program)
                });
                gl.delete_shader(fs);
                let program = linked?;
                // The vertex shader object stays alive: variants relink it.
                entry.programs.push(ProgramRecord::new(
                    current.expect("entry exists"),
                    program,
                    vs,
                    fragment_src.clone(),
                ));
            }
            Call::UseProgram { program } => {
                let original = entry
                    .program_record(*program)
                    .ok_or_else(|| DrawscopeError::replay("trace uses an unknown program slot"))?
                    .original();
                entry.gl.use_program(Some(original));
            }
            Call::CreateBuffer { data } => {
                let buffer = gl.create_buffer()?;
                gl.bind_array_buffer(Some(buffer));
                gl.upload_array_buffer(data);
                entry.buffers.push(buffer);
            }
            Call::BindArrayBuffer { buffer } => {
                let id = entry
                    .buffers
                    .get(*buffer as usize)
                    .copied()
                    .ok_or_else(|| DrawscopeError::replay("trace binds an unknown buffer slot"))?;
                entry.gl.bind_array_buffer(Some(id));
            }
            Call::VertexAttribPointer {
                index,
                size,
                normalized,
                stride,
                offset,
            } => gl.set_vertex_attrib_pointer(*index, *size, *normalized, *stride, *offset),
            Call::EnableVertexAttrib { index } => gl.set_vertex_attrib_enabled(*index, true),
            Call::SetUniform { name, value } => {
                if let Some(program) = gl.current_program()
                    && let Some(location) = gl.uniform_location(program, name)
                {
                    gl.set_uniform(location, value);
                }
            }
            Call::SetClearColor { rgba } => gl.set_clear_color(*rgba),
            Call::Clear {
                color,
                depth,
                stencil,
            } => gl.clear(*color, *depth, *stencil),
            Call::SetBlendFunc { src, dst } => gl.set_blend_func(*src, *dst),
            Call::DrawArrays { mode, first, count } => gl.draw_arrays(*mode, *first, *count),
        }
        Ok(())
    }
}

/// The playback session exposed to the (out-of-scope) UI and command layers.
pub struct ReplaySession {
    core: ReplayCore,
    visualizers: Vec<Option<Box<dyn Visualizer>>>,
    table: MutatorTable,
}

impl ReplaySession {
    pub fn new(trace: Trace, factory: impl ContextFactory + 'static) -> Self {
        Self {
            core: ReplayCore::new(trace, Box::new(factory)),
            visualizers: Vec::new(),
            table: MutatorTable::default(),
        }
    }

    pub fn core(&self) -> &ReplayCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ReplayCore {
        &mut self.core
    }

    /// Registers a visualizer and populates the mutator table exactly once.
    pub fn add_visualizer(&mut self, mut visualizer: Box<dyn Visualizer>) -> VisualizerId {
        let id = VisualizerId(self.visualizers.len());
        let mut registrar = MutatorRegistrar::new(&mut self.table, id);
        visualizer.setup_mutators(&mut registrar);
        debug!(id = id.0, name = visualizer.name(), "registered visualizer");
        self.visualizers.push(Some(visualizer));
        id
    }

    /// The single visualizer allowed to wrap/replace calls right now.
    pub fn active_visualizer(&self) -> Option<VisualizerId> {
        self.visualizers
            .iter()
            .position(|v| v.as_ref().is_some_and(|v| v.is_active()))
            .map(VisualizerId)
    }

    /// Seeks the trace cursor to `target` (exclusive upper call index),
    /// replaying from the start when moving backwards.
    #[instrument(skip(self))]
    pub fn seek(&mut self, target: usize) -> DrawscopeResult<()> {
        let target = target.min(self.core.trace.len());
        self.refresh_experiment_hash();
        if target < self.core.cursor {
            self.rewind_all();
        }
        self.run_seek(target, true)?;
        self.finish_active_seek()
    }

    /// Forwarded `PLAY_STOPPED` notification from the playback clock/UI.
    pub fn play_stopped(&mut self) {
        self.broadcast(StepEvent::PlayStopped);
    }

    /// Activates (or toggles) a visualizer. Rejected while a different
    /// visualizer is active: only one may wrap or replace calls at a time.
    pub fn trigger(&mut self, id: VisualizerId, args: TriggerArgs) -> DrawscopeResult<()> {
        self.ensure_unambiguous(id)?;
        let directive = self.with_visualizer(id, |v, core| v.trigger(core, &args))?;
        self.apply_directive(directive)
    }

    /// Seeks a visualizer to a specific substep of the current step.
    pub fn apply_to_sub_step(&mut self, id: VisualizerId, index: usize) -> DrawscopeResult<()> {
        self.ensure_unambiguous(id)?;
        let directive = self.with_visualizer(id, |v, core| v.apply_to_sub_step(core, index))?;
        self.apply_directive(directive)
    }

    /// Returns playback to unmodified behavior: deactivates the visualizer
    /// and cleanly replays the trace up to the current position without any
    /// mutators dispatching.
    pub fn restore_state(&mut self, id: VisualizerId) -> DrawscopeResult<()> {
        let target = self.core.cursor;
        self.with_visualizer(id, |v, _| v.deactivate());
        self.apply_directive(SeekDirective::ReplayClean { to: target })
    }

    /// Disposes every visualizer's GPU resources. Contexts themselves are
    /// torn down when the session drops.
    pub fn dispose(&mut self) {
        for index in 0..self.visualizers.len() {
            self.with_visualizer(VisualizerId(index), |v, core| v.dispose(core));
        }
    }

    fn ensure_unambiguous(&self, id: VisualizerId) -> DrawscopeResult<()> {
        match self.active_visualizer() {
            Some(active) if active != id => Err(DrawscopeError::replay(
                "another visualizer is already active for this session",
            )),
            _ => Ok(()),
        }
    }

    fn apply_directive(&mut self, directive: SeekDirective) -> DrawscopeResult<()> {
        match directive {
            SeekDirective::None => Ok(()),
            SeekDirective::Replay { to } => {
                self.refresh_experiment_hash();
                self.rewind_all();
                self.run_seek(to, true)?;
                self.finish_active_seek()
            }
            SeekDirective::ReplayClean { to } => {
                self.refresh_experiment_hash();
                self.rewind_all();
                self.run_seek(to, false)
            }
        }
    }

    fn rewind_all(&mut self) {
        self.core.rewind();
        for slot in &mut self.visualizers {
            if let Some(v) = slot.as_mut() {
                v.on_contexts_reset();
            }
        }
    }

    fn refresh_experiment_hash(&mut self) {
        let mut hashes: Vec<String> = self
            .visualizers
            .iter()
            .flatten()
            .filter(|v| v.is_active())
            .map(|v| v.state_hash())
            .collect();
        hashes.sort();
        self.core.experiment_hash = if hashes.is_empty() {
            "unmodified".to_string()
        } else {
            hashes.join("|")
        };
    }

    fn run_seek(&mut self, target: usize, mutators: bool) -> DrawscopeResult<()> {
        let target = target.min(self.core.trace.len());
        while self.core.cursor < target {
            let index = self.core.cursor;
            let call = self
                .core
                .trace
                .call(index)
                .expect("cursor stays in bounds")
                .clone();

            if self.core.trace.starts_step(index) {
                let step = self.core.trace.pos(index).step;
                let event = if step == 0 {
                    StepEvent::StepStarted { step }
                } else {
                    StepEvent::StepChanged { step }
                };
                self.broadcast(event);
            }

            if mutators {
                self.dispatch(&call, index)?;
            } else {
                self.core.execute_call(&call)?;
            }
            self.core.cursor = index + 1;
        }
        Ok(())
    }

    /// Dispatch order per call: the active visualizer's `replace` decides
    /// whether the real call runs; at most one `wrap` (the active
    /// visualizer's) runs it with extra rendering; `post` hooks from every
    /// registered visualizer fire afterwards in registration order.
    fn dispatch(&mut self, call: &Call, index: usize) -> DrawscopeResult<()> {
        let kind = call.kind();
        let hooks: Vec<(VisualizerId, HookKind)> = self.table.hooks(kind).to_vec();
        let active = self.active_visualizer();

        let mut skip = false;
        for &(id, hook) in &hooks {
            if hook == HookKind::Replace && Some(id) == active {
                skip |= self.with_visualizer(id, |v, core| v.replace(core, call, index))?;
            }
        }

        if !skip {
            let wrapper = hooks
                .iter()
                .find(|&&(id, hook)| hook == HookKind::Wrap && Some(id) == active)
                .map(|&(id, _)| id);
            match wrapper {
                Some(id) => self.with_visualizer(id, |v, core| v.wrap(core, call, index))?,
                None => self.core.execute_call(call)?,
            }
        }

        for &(id, hook) in &hooks {
            if hook == HookKind::Post {
                self.with_visualizer(id, |v, core| v.post(core, call, index))?;
            }
        }
        Ok(())
    }

    fn broadcast(&mut self, event: StepEvent) {
        for index in 0..self.visualizers.len() {
            self.with_visualizer(VisualizerId(index), |v, core| v.on_step_event(core, event));
        }
    }

    /// Lets the active visualizer composite its finished overlay after a
    /// mutator-enabled seek.
    fn finish_active_seek(&mut self) -> DrawscopeResult<()> {
        if let Some(id) = self.active_visualizer() {
            self.with_visualizer(id, |v, core| v.on_seek_end(core))?;
        }
        Ok(())
    }

    fn with_visualizer<R>(
        &mut self,
        id: VisualizerId,
        f: impl FnOnce(&mut dyn Visualizer, &mut ReplayCore) -> R,
    ) -> R {
        let mut visualizer = self.visualizers[id.0]
            .take()
            .expect("visualizer re-entered from its own hook");
        let out = f(visualizer.as_mut(), &mut self.core);
        self.visualizers[id.0] = Some(visualizer);
        out
    }
}
