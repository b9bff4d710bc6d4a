#![forbid(unsafe_code)]

pub mod error;
pub mod gl;
pub mod highlight;
pub mod overdraw;
pub mod session;
pub mod snapshot;
pub mod softgl;
pub mod surface;
pub mod timing;
pub mod trace;
pub mod variant;
pub mod visualizer;

pub use error::{DrawscopeError, DrawscopeResult};
pub use gl::GlContext;
pub use session::{ContextFactory, ContextHandle, ReplayCore, ReplaySession};
pub use trace::{Call, CallPos, StepEvent, Trace, TraceBuilder};
pub use visualizer::{SeekDirective, TriggerArgs, Visualizer, VisualizerId};
