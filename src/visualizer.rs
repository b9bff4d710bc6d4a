//! The visualizer contract: activation lifecycle, per-call-kind mutator
//! registration, and the replay-state hash that identifies an "experiment".
//!
//! Shared behavior is composed, not inherited: concrete visualizers embed the
//! helpers they need ([`DrawCallFilter`], [`StateHash`]) and implement the one
//! [`Visualizer`] trait.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::DrawscopeResult;
use crate::session::ReplayCore;
use crate::trace::{Call, CallKind, StepEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VisualizerId(pub usize);

/// The three mutator flavors a visualizer can register per call kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    /// Runs after the real call; may read results and update tracking, but
    /// must not re-issue calls that alter observable output.
    Post,
    /// Decides whether the real call is skipped this time.
    Replace,
    /// Runs the real call itself plus additional rendering around it.
    Wrap,
}

/// Ordered mutator table: per call kind, the registered (visualizer, hook)
/// pairs in registration order.
#[derive(Debug, Default)]
pub struct MutatorTable {
    hooks: IndexMap<CallKind, SmallVec<[(VisualizerId, HookKind); 4]>>,
}

impl MutatorTable {
    pub fn hooks(&self, kind: CallKind) -> &[(VisualizerId, HookKind)] {
        self.hooks.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn register(&mut self, id: VisualizerId, kind: CallKind, hook: HookKind) {
        self.hooks.entry(kind).or_default().push((id, hook));
    }
}

/// Registration handle passed to [`Visualizer::setup_mutators`], bound to the
/// visualizer being registered.
pub struct MutatorRegistrar<'a> {
    table: &'a mut MutatorTable,
    id: VisualizerId,
}

impl<'a> MutatorRegistrar<'a> {
    pub(crate) fn new(table: &'a mut MutatorTable, id: VisualizerId) -> Self {
        Self { table, id }
    }

    pub fn register(&mut self, kind: CallKind, hook: HookKind) {
        self.table.register(self.id, kind, hook);
    }
}

/// What the session should do after a lifecycle call returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekDirective {
    None,
    /// Rewind to the trace start and replay forward to call index `to` with
    /// mutators dispatching normally.
    Replay { to: usize },
    /// Same, but with every mutator disabled: unmodified playback.
    ReplayClean { to: usize },
}

/// Arguments to [`Visualizer::trigger`]; fields a given visualizer does not
/// care about are simply left `None`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TriggerArgs {
    pub call_index: Option<usize>,
}

/// A pluggable observer/mutator of trace replay.
///
/// Lifecycle: constructed inactive, `setup_mutators` exactly once at
/// registration, `trigger`/`apply_to_sub_step` while engaged, `deactivate`
/// when the session restores unmodified playback, `dispose` releases GPU
/// resources.
pub trait Visualizer {
    fn name(&self) -> &'static str;

    /// Called exactly once, at registration, to populate the mutator table.
    fn setup_mutators(&mut self, registrar: &mut MutatorRegistrar<'_>);

    fn is_active(&self) -> bool;

    /// Activates (or re-targets) the visualization. The returned directive
    /// tells the session how to re-run the trace; the visualization itself
    /// happens inside the hooks during that replay.
    fn trigger(
        &mut self,
        core: &mut ReplayCore,
        args: &TriggerArgs,
    ) -> DrawscopeResult<SeekDirective>;

    /// Seeks the visualization to an arbitrary substep of the current step.
    fn apply_to_sub_step(
        &mut self,
        core: &mut ReplayCore,
        index: usize,
    ) -> DrawscopeResult<SeekDirective> {
        let _ = (core, index);
        Ok(SeekDirective::None)
    }

    /// Drops the active flag without touching the context; the session pairs
    /// this with a clean replay so playback returns to unmodified behavior.
    fn deactivate(&mut self);

    fn post(&mut self, core: &mut ReplayCore, call: &Call, index: usize) -> DrawscopeResult<()> {
        let _ = (core, call, index);
        Ok(())
    }

    /// Returns `true` when the real call should be skipped this time.
    fn replace(
        &mut self,
        core: &mut ReplayCore,
        call: &Call,
        index: usize,
    ) -> DrawscopeResult<bool> {
        let _ = (core, call, index);
        Ok(false)
    }

    /// Runs the real call plus any additional rendering. The default is the
    /// real call alone.
    fn wrap(&mut self, core: &mut ReplayCore, call: &Call, index: usize) -> DrawscopeResult<()> {
        let _ = index;
        core.execute_call(call)
    }

    fn on_step_event(&mut self, core: &mut ReplayCore, event: StepEvent) {
        let _ = (core, event);
    }

    /// Called when the session rewinds to the trace start and tears down every
    /// live context. Cached per-context resources (surfaces, variants) are
    /// gone and must be dropped, not disposed.
    fn on_contexts_reset(&mut self) {}

    /// Runs after a seek the session performed on this visualizer's behalf
    /// finishes; the place to composite a finished overlay.
    fn on_seek_end(&mut self, core: &mut ReplayCore) -> DrawscopeResult<()> {
        let _ = core;
        Ok(())
    }

    /// Stable, order-independent encoding of whichever configuration affects
    /// rendered output. Identical configuration must yield identical strings;
    /// activation history must not leak in.
    fn state_hash(&self) -> String;

    /// Releases every GPU resource the visualizer owns.
    fn dispose(&mut self, core: &mut ReplayCore) {
        let _ = core;
    }
}

/// Builds the stable experiment-hash string: sorted `key=value` pairs joined
/// with `;`, list values sorted internally, so insertion order never shows.
#[derive(Clone, Debug, Default)]
pub struct StateHash {
    entries: BTreeMap<String, String>,
}

impl StateHash {
    pub fn new(visualizer: &str) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("visualizer".to_string(), visualizer.to_string());
        Self { entries }
    }

    pub fn entry(mut self, key: &str, value: impl Display) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    pub fn list<T: Display>(mut self, key: &str, items: impl IntoIterator<Item = T>) -> Self {
        let mut rendered: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
        rendered.sort();
        self.entries
            .insert(key.to_string(), format!("[{}]", rendered.join(",")));
        self
    }

    pub fn finish(self) -> String {
        self.entries
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Composition helper for draw-call visualizers: tracks which trace program
/// slot is current and which slots are suppressed, and contributes both to
/// the owner's state hash.
#[derive(Clone, Debug, Default)]
pub struct DrawCallFilter {
    suppressed: BTreeSet<u32>,
    current_slot: Option<u32>,
}

impl DrawCallFilter {
    pub fn suppress(&mut self, program_slot: u32) {
        self.suppressed.insert(program_slot);
    }

    pub fn allow(&mut self, program_slot: u32) {
        self.suppressed.remove(&program_slot);
    }

    pub fn suppressed(&self) -> impl Iterator<Item = u32> + '_ {
        self.suppressed.iter().copied()
    }

    /// Feed every replayed call through here (a `post` hook on `UseProgram`
    /// suffices) so the filter knows the current program slot.
    pub fn observe(&mut self, call: &Call) {
        if let Call::UseProgram { program } = call {
            self.current_slot = Some(*program);
        }
    }

    pub fn current_slot(&self) -> Option<u32> {
        self.current_slot
    }

    /// True when the draw about to execute uses a suppressed program.
    pub fn should_skip(&self) -> bool {
        self.current_slot
            .is_some_and(|slot| self.suppressed.contains(&slot))
    }

    pub fn hash_into(&self, hash: StateHash) -> StateHash {
        hash.list("suppressed_programs", self.suppressed.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_hash_is_order_independent() {
        let a = StateHash::new("overdraw")
            .entry("alpha", "0.05")
            .list("suppressed_programs", [12u32, 7])
            .finish();
        let b = StateHash::new("overdraw")
            .list("suppressed_programs", [7u32, 12])
            .entry("alpha", "0.05")
            .finish();
        assert_eq!(a, b);
    }

    #[test]
    fn state_hash_changes_with_configuration() {
        let a = StateHash::new("overdraw").entry("visible", true).finish();
        let b = StateHash::new("overdraw").entry("visible", false).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn filter_skips_only_suppressed_slots() {
        let mut filter = DrawCallFilter::default();
        filter.suppress(7);
        filter.observe(&Call::UseProgram { program: 3 });
        assert!(!filter.should_skip());
        filter.observe(&Call::UseProgram { program: 7 });
        assert!(filter.should_skip());
        filter.allow(7);
        assert!(!filter.should_skip());
    }

    #[test]
    fn registration_order_is_preserved_per_kind() {
        let mut table = MutatorTable::default();
        let mut reg = MutatorRegistrar::new(&mut table, VisualizerId(0));
        reg.register(CallKind::DrawArrays, HookKind::Post);
        let mut reg = MutatorRegistrar::new(&mut table, VisualizerId(1));
        reg.register(CallKind::DrawArrays, HookKind::Wrap);
        reg.register(CallKind::UseProgram, HookKind::Post);

        let hooks = table.hooks(CallKind::DrawArrays);
        assert_eq!(hooks[0], (VisualizerId(0), HookKind::Post));
        assert_eq!(hooks[1], (VisualizerId(1), HookKind::Wrap));
        assert!(table.hooks(CallKind::Clear).is_empty());
    }
}
