//! Highlight round trip: targeting a draw freezes the scene at that draw,
//! paints the draw in the marker color with later draws dimmed on top, and
//! toggling the same target off restores bit-identical baseline pixels.

use drawscope::error::{DrawscopeError, DrawscopeResult};
use drawscope::gl::{GlContext, PrimitiveMode};
use drawscope::highlight::HighlightVisualizer;
use drawscope::softgl::SoftContext;
use drawscope::{Call, ReplaySession, Trace, TraceBuilder, TriggerArgs};

const VS: &str = "attribute vec2 a_position;
void main() { gl_Position = vec4(a_position, 0.0, 1.0); }";

const DRAW_A: usize = 11;
const DRAW_B: usize = 15;

fn factory(width: u32, height: u32) -> DrawscopeResult<Box<dyn GlContext>> {
    Ok(Box::new(SoftContext::new(width, height)))
}

fn quad(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<f32> {
    vec![x0, y0, x1, y0, x0, y1, x0, y1, x1, y0, x1, y1]
}

fn flat(color: &str) -> String {
    format!("void main() {{ gl_FragColor = vec4({color}); }}")
}

/// Full-screen red draw (call 11) occluded on the left half by blue (call 15).
fn scene() -> Trace {
    let mut b = TraceBuilder::new();
    b.push(Call::CreateContext {
        width: 4,
        height: 4,
    });
    b.push(Call::CreateProgram {
        vertex_src: VS.to_string(),
        fragment_src: flat("1.0, 0.0, 0.0, 1.0"),
    });
    b.push(Call::CreateProgram {
        vertex_src: VS.to_string(),
        fragment_src: flat("0.0, 0.0, 1.0, 1.0"),
    });
    b.push(Call::CreateBuffer {
        data: quad(-1.0, -1.0, 1.0, 1.0),
    });
    b.push(Call::CreateBuffer {
        data: quad(-1.0, -1.0, 0.0, 1.0),
    });
    b.push(Call::SetClearColor { rgba: [0.0; 4] });
    b.push(Call::Clear {
        color: true,
        depth: false,
        stencil: false,
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
    b.push(Call::DrawArrays {
        mode: PrimitiveMode::Triangles,
        first: 0,
        count: 6,
    });
    b.push(Call::UseProgram { program: 1 });
    b.push(Call::BindArrayBuffer { buffer: 1 });
    b.push(Call::VertexAttribPointer {
        index: 0,
        size: 2,
        normalized: false,
        stride: 0,
        offset: 0,
    });
    b.push(Call::DrawArrays {
        mode: PrimitiveMode::Triangles,
        first: 0,
        count: 6,
    });
    b.end_step();
    b.build()
}

fn pixels(session: &mut ReplaySession) -> Vec<u8> {
    let handle = session.core().current_context().unwrap();
    session.core_mut().gl_mut(handle).unwrap().read_pixels(4, 4)
}

fn pixel(px: &[u8], x: usize, y: usize) -> [u8; 4] {
    let at = (y * 4 + x) * 4;
    [px[at], px[at + 1], px[at + 2], px[at + 3]]
}

fn session_with_highlight() -> (ReplaySession, drawscope::VisualizerId) {
    let trace = scene();
    assert!(matches!(
        trace.call(DRAW_A),
        Some(Call::DrawArrays { .. })
    ));
    assert!(matches!(
        trace.call(DRAW_B),
        Some(Call::DrawArrays { .. })
    ));
    let len = trace.len();
    let mut session = ReplaySession::new(trace, factory);
    let id = session.add_visualizer(Box::new(HighlightVisualizer::new()));
    session.seek(len).unwrap();
    (session, id)
}

#[test]
fn baseline_scene_draws_blue_over_red() {
    let (mut session, _) = session_with_highlight();
    let px = pixels(&mut session);
    assert_eq!(pixel(&px, 0, 0), [0, 0, 255, 255]);
    assert_eq!(pixel(&px, 3, 0), [255, 0, 0, 255]);
}

#[test]
fn highlighting_paints_the_target_in_the_marker_color() {
    let (mut session, id) = session_with_highlight();
    session
        .trigger(
            id,
            TriggerArgs {
                call_index: Some(DRAW_A),
            },
        )
        .unwrap();

    let px = pixels(&mut session);
    // Right half: the highlighted draw alone, in the solid marker color.
    assert_eq!(pixel(&px, 3, 0), [255, 0, 204, 255]);
    // Left half: the later blue draw shows as a dim silhouette over the
    // marker, so it matches neither the baseline nor the plain marker.
    let left = pixel(&px, 0, 0);
    assert_ne!(left, [0, 0, 255, 255]);
    assert_ne!(left, [255, 0, 204, 255]);

    let handle = session.core().current_context().unwrap();
    let status = session.core().status(handle).unwrap();
    assert!(status.contains(&DRAW_A.to_string()), "status was: {status}");
}

#[test]
fn toggling_the_same_target_restores_baseline_pixels() {
    let (mut session, id) = session_with_highlight();
    let before = pixels(&mut session);

    let args = TriggerArgs {
        call_index: Some(DRAW_A),
    };
    session.trigger(id, args).unwrap();
    assert_ne!(pixels(&mut session), before);

    session.trigger(id, args).unwrap();
    assert_eq!(pixels(&mut session), before);
    assert!(session.active_visualizer().is_none());
    assert_eq!(session.core().experiment_hash(), "unmodified");
}

#[test]
fn retargeting_moves_the_highlight_to_the_new_draw() {
    let (mut session, id) = session_with_highlight();
    session
        .trigger(
            id,
            TriggerArgs {
                call_index: Some(DRAW_A),
            },
        )
        .unwrap();
    session
        .trigger(
            id,
            TriggerArgs {
                call_index: Some(DRAW_B),
            },
        )
        .unwrap();

    let px = pixels(&mut session);
    // Draw B covers only the left half; the backdrop (full baseline scene as
    // of B) shows through on the right.
    assert_eq!(pixel(&px, 0, 0), [255, 0, 204, 255]);
    assert_eq!(pixel(&px, 3, 0), [255, 0, 0, 255]);
}

#[test]
fn apply_to_sub_step_retargets_like_a_trigger() {
    let (mut session, id) = session_with_highlight();
    session.apply_to_sub_step(id, DRAW_B).unwrap();
    assert_eq!(session.active_visualizer(), Some(id));

    let px = pixels(&mut session);
    // Draw B covers only the left half; the backdrop shows through on the right.
    assert_eq!(pixel(&px, 0, 0), [255, 0, 204, 255]);
    assert_eq!(pixel(&px, 3, 0), [255, 0, 0, 255]);

    // Scrubbing to an earlier substep moves the highlight there.
    session.apply_to_sub_step(id, DRAW_A).unwrap();
    let px = pixels(&mut session);
    assert_eq!(pixel(&px, 3, 0), [255, 0, 204, 255]);
}

#[test]
fn non_draw_targets_are_rejected() {
    let (mut session, id) = session_with_highlight();
    let err = session
        .trigger(id, TriggerArgs { call_index: Some(0) })
        .unwrap_err();
    assert!(matches!(err, DrawscopeError::Replay(_)));
    assert!(session.active_visualizer().is_none());
}
