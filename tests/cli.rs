use assert_cmd::prelude::*;
use predicates::str::contains;
use std::io::Write;
use std::process::Command;
use tempfile::{Builder, NamedTempFile};

fn mesh_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut tmp = Builder::new()
        .prefix("quad")
        .suffix(suffix)
        .tempfile()
        .expect("temp mesh");
    tmp.write_all(contents.as_bytes()).expect("write mesh");
    tmp
}

const QUAD_OBJ: &str = "\
# unit quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3
f 1 3 4
";

const TETRA_OFF: &str = "\
OFF
4 4 6
0 0 0
1 0 0
0 1 0
0 0 1
3 0 2 1
3 0 1 3
3 0 3 2
3 1 2 3
";

#[test]
fn summary_reports_obj_layout() {
    let mesh = mesh_file(".obj", QUAD_OBJ);
    let mut cmd = Command::cargo_bin("meshview").expect("binary exists");
    cmd.arg(mesh.path()).arg("--summary-only");
    cmd.assert()
        .success()
        .stdout(contains("4 vertices, 2 triangles"))
        .stdout(contains("Vertex buffer: 144 bytes"))
        .stdout(contains(" - position @0 offset=0 size=48"))
        .stdout(contains(" - color @1 offset=48 size=48"))
        .stdout(contains(" - normal @2 offset=96 size=48"))
        .stdout(contains("Frame: 2 draw(s), 4 buffer(s) live"));
}

#[test]
fn summary_reads_off_meshes() {
    let mesh = mesh_file(".off", TETRA_OFF);
    let mut cmd = Command::cargo_bin("meshview").expect("binary exists");
    cmd.arg(mesh.path()).arg("--summary-only");
    cmd.assert()
        .success()
        .stdout(contains("4 vertices, 4 triangles"));
}

#[test]
fn summary_without_mesh_draws_the_axis() {
    let mut cmd = Command::cargo_bin("meshview").expect("binary exists");
    cmd.arg("--summary-only");
    cmd.assert()
        .success()
        .stdout(contains("No mesh loaded"))
        .stdout(contains("Frame: 1 draw(s), 2 buffer(s) live"));
}

#[test]
fn wireframe_config_adds_an_overlay_draw() {
    let mesh = mesh_file(".obj", QUAD_OBJ);
    let mut config = Builder::new().suffix(".toml").tempfile().expect("temp config");
    config
        .write_all(b"[display]\nwireframe = true\n")
        .expect("write config");
    let mut cmd = Command::cargo_bin("meshview").expect("binary exists");
    cmd.arg(mesh.path())
        .arg("--config")
        .arg(config.path())
        .arg("--summary-only");
    cmd.assert()
        .success()
        .stdout(contains("Frame: 3 draw(s)"));
}

#[test]
fn unsupported_format_fails() {
    let mesh = mesh_file(".stl", "solid nothing\n");
    let mut cmd = Command::cargo_bin("meshview").expect("binary exists");
    cmd.arg(mesh.path()).arg("--summary-only");
    cmd.assert()
        .failure()
        .stderr(contains("unsupported mesh format"));
}

#[test]
fn unknown_argument_fails() {
    let mut cmd = Command::cargo_bin("meshview").expect("binary exists");
    cmd.arg("--run-scripts");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --run-scripts"));
}
