//! In-memory trace model: the ordered call sequence the engine replays.
//!
//! Trace persistence is a collaborator concern; this module only defines the
//! executable call kinds, their step/substep positions, and the step-boundary
//! events visualizers subscribe to. Calls reference programs and buffers by
//! trace-local slot indices (creation order within their context); the replay
//! session remaps slots to live ids, so a trace stays valid across rewinds
//! that recreate every context from scratch.

use crate::gl::{BlendFactor, Capability, PrimitiveMode, UniformValue};

/// One recorded graphics call.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Call {
    /// Context-creation event observed in the trace. The session materializes
    /// a live context through its factory when replaying this.
    CreateContext { width: u32, height: u32 },
    Enable { cap: Capability },
    Disable { cap: Capability },
    /// Condensed program construction: compile both stages, link, record.
    CreateProgram {
        vertex_src: String,
        fragment_src: String,
    },
    UseProgram { program: u32 },
    CreateBuffer { data: Vec<f32> },
    BindArrayBuffer { buffer: u32 },
    VertexAttribPointer {
        index: u32,
        size: i32,
        normalized: bool,
        stride: i32,
        offset: i32,
    },
    EnableVertexAttrib { index: u32 },
    SetUniform { name: String, value: UniformValue },
    SetClearColor { rgba: [f32; 4] },
    Clear {
        color: bool,
        depth: bool,
        stencil: bool,
    },
    SetBlendFunc {
        src: BlendFactor,
        dst: BlendFactor,
    },
    DrawArrays {
        mode: PrimitiveMode,
        first: i32,
        count: i32,
    },
}

/// Data-free discriminant of [`Call`], the key mutators register against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CallKind {
    CreateContext,
    Enable,
    Disable,
    CreateProgram,
    UseProgram,
    CreateBuffer,
    BindArrayBuffer,
    VertexAttribPointer,
    EnableVertexAttrib,
    SetUniform,
    SetClearColor,
    Clear,
    SetBlendFunc,
    DrawArrays,
}

impl Call {
    pub fn kind(&self) -> CallKind {
        match self {
            Call::CreateContext { .. } => CallKind::CreateContext,
            Call::Enable { .. } => CallKind::Enable,
            Call::Disable { .. } => CallKind::Disable,
            Call::CreateProgram { .. } => CallKind::CreateProgram,
            Call::UseProgram { .. } => CallKind::UseProgram,
            Call::CreateBuffer { .. } => CallKind::CreateBuffer,
            Call::BindArrayBuffer { .. } => CallKind::BindArrayBuffer,
            Call::VertexAttribPointer { .. } => CallKind::VertexAttribPointer,
            Call::EnableVertexAttrib { .. } => CallKind::EnableVertexAttrib,
            Call::SetUniform { .. } => CallKind::SetUniform,
            Call::SetClearColor { .. } => CallKind::SetClearColor,
            Call::Clear { .. } => CallKind::Clear,
            Call::SetBlendFunc { .. } => CallKind::SetBlendFunc,
            Call::DrawArrays { .. } => CallKind::DrawArrays,
        }
    }
}

/// Position of a call in the step/substep index space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CallPos {
    pub step: usize,
    pub substep: usize,
}

/// Step-boundary notifications, delivered during a seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StepEvent {
    StepStarted { step: usize },
    StepChanged { step: usize },
    PlayStopped,
}

/// An immutable, seekable sequence of calls partitioned into steps.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    calls: Vec<Call>,
    step_starts: Vec<usize>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn call(&self, index: usize) -> Option<&Call> {
        self.calls.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.step_starts.len()
    }

    /// Index of the first call of `step`, if the step exists.
    pub fn step_start(&self, step: usize) -> Option<usize> {
        self.step_starts.get(step).copied()
    }

    /// Step/substep position of the call at `index`.
    pub fn pos(&self, index: usize) -> CallPos {
        let step = self.step_starts.partition_point(|&s| s <= index).max(1) - 1;
        CallPos {
            step,
            substep: index - self.step_starts.get(step).copied().unwrap_or(0),
        }
    }

    /// True when `index` is the first call of its step.
    pub fn starts_step(&self, index: usize) -> bool {
        self.step_starts.binary_search(&index).is_ok()
    }
}

/// Builds a [`Trace`] call by call; `end_step` closes the current step.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    calls: Vec<Call>,
    step_starts: Vec<usize>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: Call) -> &mut Self {
        if self.step_starts.is_empty() {
            self.step_starts.push(0);
        }
        self.calls.push(call);
        self
    }

    pub fn end_step(&mut self) -> &mut Self {
        self.step_starts.push(self.calls.len());
        self
    }

    pub fn build(self) -> Trace {
        let mut step_starts = self.step_starts;
        // A trailing end_step with no calls after it adds no step.
        while step_starts.last() == Some(&self.calls.len()) && !self.calls.is_empty() {
            step_starts.pop();
        }
        if step_starts.is_empty() && !self.calls.is_empty() {
            step_starts.push(0);
        }
        Trace {
            calls: self.calls,
            step_starts,
        }
    }
}
