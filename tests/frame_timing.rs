//! Frame timing through a real session: step boundaries produce samples,
//! stopping playback cancels the open sample, and engaging a visualizer moves
//! new samples into that experiment's series.

use drawscope::error::DrawscopeResult;
use drawscope::gl::{GlContext, PrimitiveMode};
use drawscope::overdraw::OverdrawVisualizer;
use drawscope::softgl::SoftContext;
use drawscope::timing::{FrameTimingRecorder, ManualClock};
use drawscope::{Call, ReplaySession, Trace, TraceBuilder, TriggerArgs};

const VS: &str = "attribute vec2 a_position;
void main() { gl_Position = vec4(a_position, 0.0, 1.0); }";

fn factory(width: u32, height: u32) -> DrawscopeResult<Box<dyn GlContext>> {
    Ok(Box::new(SoftContext::new(width, height)))
}

fn draw() -> Call {
    Call::DrawArrays {
        mode: PrimitiveMode::Triangles,
        first: 0,
        count: 6,
    }
}

/// Three steps: setup plus one draw, then one draw per later step.
fn scene() -> Trace {
    let mut b = TraceBuilder::new();
    b.push(Call::CreateContext {
        width: 4,
        height: 4,
    });
    b.push(Call::CreateProgram {
        vertex_src: VS.to_string(),
        fragment_src: "void main() { gl_FragColor = vec4(1.0, 1.0, 1.0, 1.0); }".to_string(),
    });
    b.push(Call::CreateBuffer {
        data: vec![-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0],
    });
    b.push(Call::UseProgram { program: 0 });
    b.push(Call::BindArrayBuffer { buffer: 0 });
    b.push(Call::VertexAttribPointer {
        index: 0,
        size: 2,
        normalized: false,
        stride: 0,
        offset: 0,
    });
    b.push(Call::EnableVertexAttrib { index: 0 });
    b.push(draw());
    b.end_step();
    b.push(draw());
    b.end_step();
    b.push(draw());
    b.end_step();
    b.build()
}

#[test]
fn a_full_seek_commits_every_bounded_step() {
    let trace = scene();
    let len = trace.len();
    let mut session = ReplaySession::new(trace, factory);
    let rec = FrameTimingRecorder::new(ManualClock::default());
    let handle = rec.handle();
    session.add_visualizer(Box::new(rec));

    session.seek(len).unwrap();
    // Steps 0 and 1 are bounded by the next step's start; step 2 stays open
    // until something closes or cancels it.
    let samples = handle.samples("unmodified");
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].step, 0);
    assert_eq!(samples[1].step, 1);
}

#[test]
fn play_stopped_cancels_the_open_sample() {
    let trace = scene();
    let len = trace.len();
    let mut session = ReplaySession::new(trace, factory);
    let clock = ManualClock::default();
    let rec = FrameTimingRecorder::new(clock.clone());
    let handle = rec.handle();
    session.add_visualizer(Box::new(rec));

    session.seek(len).unwrap();
    clock.advance(42.0);
    session.play_stopped();

    // The partially elapsed step 2 must not appear in the series.
    let samples = handle.samples("unmodified");
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.step != 2));
}

#[test]
fn experiments_get_their_own_series() {
    let trace = scene();
    let len = trace.len();
    let mut session = ReplaySession::new(trace, factory);
    let rec = FrameTimingRecorder::new(ManualClock::default());
    let handle = rec.handle();
    session.add_visualizer(Box::new(rec));
    let overdraw = session.add_visualizer(Box::new(OverdrawVisualizer::new()));

    session.seek(len).unwrap();
    session.trigger(overdraw, TriggerArgs::default()).unwrap();

    let experiments = handle.experiments();
    assert_eq!(experiments.len(), 2);
    assert_eq!(experiments[0], "unmodified");
    assert!(experiments[1].contains("visualizer=overdraw"));
    assert_eq!(handle.samples(&experiments[1]).len(), 2);
}
