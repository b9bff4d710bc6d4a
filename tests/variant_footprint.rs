//! A program variant must cover exactly the pixels the original covers: same
//! vertex stage, synced uniforms and attributes, different color only.

use drawscope::gl::{GlContext, PrimitiveMode, ShaderStage, UniformValue};
use drawscope::session::ContextHandle;
use drawscope::softgl::SoftContext;
use drawscope::variant::ProgramRecord;

const VS: &str = "attribute vec2 a_position;
void main() { gl_Position = vec4(a_position, 0.0, 1.0); }";

fn build_record(gl: &mut SoftContext, fragment_src: &str) -> ProgramRecord {
    let vs = gl.create_shader(ShaderStage::Vertex).unwrap();
    gl.shader_source(vs, VS);
    gl.compile_shader(vs).unwrap();
    let fs = gl.create_shader(ShaderStage::Fragment).unwrap();
    gl.shader_source(fs, fragment_src);
    gl.compile_shader(fs).unwrap();
    let program = gl.create_program().unwrap();
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.link_program(program).unwrap();
    ProgramRecord::new(ContextHandle(0), program, vs, fragment_src)
}

fn covered(gl: &mut SoftContext) -> Vec<bool> {
    gl.read_pixels(8, 8)
        .chunks_exact(4)
        .map(|px| px.iter().any(|&c| c != 0))
        .collect()
}

fn wipe(gl: &mut SoftContext) {
    gl.set_clear_color([0.0; 4]);
    gl.clear(true, false, false);
}

#[test]
fn variant_and_original_cover_identical_pixels() {
    let mut gl = SoftContext::new(8, 8);
    let mut record = build_record(
        &mut gl,
        "void main() { gl_FragColor = vec4(1.0, 0.0, 0.0, 1.0); }",
    );

    let buf = gl.create_buffer().unwrap();
    gl.bind_array_buffer(Some(buf));
    gl.upload_array_buffer(&[
        -0.5, -1.0, 0.5, -1.0, -0.5, 0.0, -0.5, 0.0, 0.5, -1.0, 0.5, 0.0,
    ]);
    gl.set_vertex_attrib_pointer(0, 2, false, 0, 0);
    gl.set_vertex_attrib_enabled(0, true);

    gl.use_program(Some(record.original()));
    gl.draw_arrays(PrimitiveMode::Triangles, 0, 6);
    let original_mask = covered(&mut gl);
    assert!(original_mask.iter().any(|&c| c));
    assert!(!original_mask.iter().all(|&c| c));

    wipe(&mut gl);
    record
        .create_variant(
            &mut gl,
            "mask",
            Some("void main() { gl_FragColor = vec4(0.0, 1.0, 0.0, 1.0); }"),
        )
        .unwrap();
    record
        .draw_with_variant(&mut gl, "mask", |gl| {
            gl.draw_arrays(PrimitiveMode::Triangles, 0, 6);
            Ok(())
        })
        .unwrap();

    assert_eq!(covered(&mut gl), original_mask);
}

#[test]
fn variant_tracks_uniform_driven_footprint_state() {
    let mut gl = SoftContext::new(8, 8);
    let mut record = build_record(
        &mut gl,
        "uniform vec4 u_color;\nvoid main() { gl_FragColor = u_color; }",
    );

    let buf = gl.create_buffer().unwrap();
    gl.bind_array_buffer(Some(buf));
    gl.upload_array_buffer(&[
        -1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0,
    ]);
    gl.set_vertex_attrib_pointer(0, 2, false, 0, 0);
    gl.set_vertex_attrib_enabled(0, true);

    gl.use_program(Some(record.original()));
    let loc = gl.uniform_location(record.original(), "u_color").unwrap();
    gl.set_uniform(loc, &UniformValue::FloatVec4([0.0, 0.0, 1.0, 1.0]));

    let variant = record
        .create_variant(
            &mut gl,
            "echo",
            Some("uniform vec4 u_color;\nvoid main() { gl_FragColor = u_color; }"),
        )
        .unwrap();
    record.sync_before_draw(&mut gl, "echo");

    let got = gl.uniform_location(variant, "u_color").unwrap();
    assert_eq!(
        gl.get_uniform(variant, got),
        Some(UniformValue::FloatVec4([0.0, 0.0, 1.0, 1.0]))
    );
}
