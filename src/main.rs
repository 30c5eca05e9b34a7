use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use winit::event_loop::EventLoop;

use meshview::{GpuContext, MeshViewer, ViewerApp, ViewerConfig, WindowInitError};

const USAGE: &str = "Usage: meshview [mesh.obj|mesh.off] [--config PATH] [--fps N] [--summary-only]";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let mut config = match &options.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    if options.fps.is_some() {
        config.target_fps = options.fps;
    }

    if options.summary_only {
        return run_headless(&config, options.mesh.as_deref());
    }
    match run_interactive(config.clone(), options.mesh.clone()) {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.downcast_ref::<WindowInitError>().is_some() {
                eprintln!(
                    "{err}. Falling back to --summary-only mode (set DISPLAY or install X11 libs to enable rendering)."
                );
                run_headless(&config, options.mesh.as_deref())
            } else {
                Err(err)
            }
        }
    }
}

/// Loads the mesh into a viewer without a window and prints what would be drawn.
fn run_headless(config: &ViewerConfig, mesh: Option<&Path>) -> Result<()> {
    let mut viewer = MeshViewer::new(
        config,
        GpuContext::default(),
        config.window.width,
        config.window.height,
        0,
    )?;
    if let Some(path) = mesh {
        viewer
            .load_mesh_file(path)
            .with_context(|| format!("failed to load mesh {}", path.display()))?;
    }
    print_summary(&mut viewer);
    Ok(())
}

fn run_interactive(config: ViewerConfig, mesh: Option<PathBuf>) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;

    ViewerApp::new(config, mesh).run(event_loop)
}

fn print_summary(viewer: &mut MeshViewer) {
    match viewer.mesh() {
        Some(mesh) => {
            println!(
                "Loaded mesh {}: {} vertices, {} triangles",
                mesh.label(),
                mesh.vertex_count(),
                mesh.element_count() / 3
            );
            if let Some(layout) = mesh.layout() {
                println!("Vertex buffer: {} bytes", layout.total_size());
                for binding in layout.bindings() {
                    println!(
                        " - {} @{} offset={} size={}",
                        binding.kind.attribute_name(),
                        binding.slot.location(),
                        binding.offset,
                        binding.span
                    );
                }
            }
        }
        None => println!("No mesh loaded"),
    }

    let frame = viewer.compose_frame();
    println!(
        "Frame: {} draw(s), {} buffer(s) live",
        frame.draws.len(),
        viewer.gpu().live_buffers()
    );
}

#[derive(Debug, Default)]
struct CliOptions {
    mesh: Option<PathBuf>,
    config: Option<PathBuf>,
    fps: Option<u32>,
    summary_only: bool,
}

impl CliOptions {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--summary-only" => options.summary_only = true,
                "--config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| anyhow!("--config needs a path. {USAGE}"))?;
                    options.config = Some(PathBuf::from(path));
                }
                "--fps" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--fps needs a number. {USAGE}"))?;
                    let fps = value
                        .parse()
                        .with_context(|| format!("invalid --fps value {value:?}"))?;
                    options.fps = Some(fps);
                }
                "-h" | "--help" => return Err(anyhow!(USAGE)),
                other if other.starts_with('-') => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
                path => {
                    if options.mesh.is_some() {
                        return Err(anyhow!("Only one mesh can be opened. {USAGE}"));
                    }
                    options.mesh = Some(PathBuf::from(path));
                }
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn parses_mesh_and_flags() {
        let options = parse(&["bunny.obj", "--fps", "30", "--summary-only"]).unwrap();
        assert_eq!(options.mesh, Some(PathBuf::from("bunny.obj")));
        assert_eq!(options.fps, Some(30));
        assert!(options.summary_only);
        assert!(options.config.is_none());
    }

    #[test]
    fn rejects_unknown_flags_and_extra_meshes() {
        assert!(parse(&["--run-scripts"]).is_err());
        assert!(parse(&["a.obj", "b.off"]).is_err());
        assert!(parse(&["--fps", "fast"]).is_err());
        assert!(parse(&["--config"]).is_err());
    }
}
