//! TNR CLI entrypoint.
//!
//! ```bash
//! tnr cuda input.mp4
//! tnr vic input.mp4 --preset outdoor-low-light --strength 0.6
//! tnr cuda frames.bgr --width 1280 --height 720 --fps 30000/1001 --json
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use tnr_accel::TnrPreset;
use tnr_core::error::{EngineError, Result};
use tnr_pipeline::runtime::{self, RunConfig, RunRequest};
use tnr_pipeline::RunReport;

#[derive(Parser, Debug)]
#[command(
    name = "tnr",
    version,
    about = "Temporal video denoiser",
    arg_required_else_help = true,
    after_help = "Examples:\n  tnr cuda input.mp4\n  tnr vic input.mp4 --preset outdoor-low-light --strength 0.6\n  tnr cuda frames.bgr --width 1280 --height 720 --fps 30 --json"
)]
struct Cli {
    /// Execution backend: `cuda` or `vic`.
    backend: String,

    /// Input video: any container FFmpeg decodes, or raw BGR frames (.bgr/.raw).
    input: PathBuf,

    /// Denoiser preset (default: indoor-medium-light).
    #[arg(long = "preset")]
    preset: Option<String>,

    /// Blend strength in [0, 1]; 0 leaves frames untouched.
    #[arg(long = "strength", allow_negative_numbers = true)]
    strength: Option<f32>,

    /// Directory the `denoised_<backend>.<ext>` artifact is written to.
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// JSON run configuration; command-line options take precedence.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Frame width of raw BGR input.
    #[arg(long = "width")]
    width: Option<u32>,

    /// Frame height of raw BGR input.
    #[arg(long = "height")]
    height: Option<u32>,

    /// Framerate of raw BGR input (`30`, `30000/1001`, `29.97`).
    #[arg(long = "fps")]
    fps: Option<String>,

    /// Print a one-line JSON summary on stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct Summary<'a> {
    ok: bool,
    #[serde(flatten)]
    report: &'a RunReport,
}

fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and are not failures.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    let json = cli.json;

    match build_request(cli).and_then(|request| runtime::run(&request)) {
        Ok(report) => {
            if json {
                match serde_json::to_string(&Summary {
                    ok: true,
                    report: &report,
                }) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize run summary"),
                }
            } else {
                println!(
                    "denoised {} frame(s) with {} -> {}",
                    report.frames_emitted,
                    report.backend,
                    report.output.as_deref().unwrap_or("-")
                );
            }
            std::process::exit(0);
        }
        Err(err) => {
            tracing::error!(error = %err, code = err.error_code(), "Run failed");
            eprintln!("{}: {err}", err.kind());
            if json {
                println!("{}", error_json(&err));
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

/// Merge the optional config file with command-line overrides.
fn build_request(cli: Cli) -> Result<RunRequest> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(name) = cli.preset.as_deref() {
        config.preset = TnrPreset::parse(name)?;
    }
    if let Some(strength) = cli.strength {
        config.strength = strength;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(width) = cli.width {
        config.width = width;
    }
    if let Some(height) = cli.height {
        config.height = height;
    }
    if let Some(fps) = cli.fps {
        config.fps = fps;
    }
    Ok(RunRequest {
        backend: cli.backend,
        input: cli.input,
        config,
    })
}

fn error_json(err: &EngineError) -> serde_json::Value {
    serde_json::json!({
        "ok": false,
        "kind": err.kind(),
        "code": err.error_code(),
        "error": err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tnr").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_line_overrides_defaults() {
        let cli = parse(&["vic", "in.bgr", "--preset", "default", "--strength", "0.5", "--width", "64"]);
        let request = build_request(cli).unwrap();
        assert_eq!(request.backend, "vic");
        assert_eq!(request.config.preset, TnrPreset::Default);
        assert_eq!(request.config.strength, 0.5);
        assert_eq!(request.config.width, 64);
        assert_eq!(request.config.height, 1080);
    }

    #[test]
    fn unknown_preset_is_configuration_error() {
        let cli = parse(&["cuda", "in.mp4", "--preset", "dusk"]);
        let err = build_request(cli).err().unwrap();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn backend_and_input_are_required() {
        assert!(Cli::try_parse_from(["tnr", "cuda"]).is_err());
    }

    #[test]
    fn error_json_names_kind_and_code() {
        let v = error_json(&EngineError::Media("x".into()));
        assert_eq!(v["kind"], "MediaError");
        assert_eq!(v["code"], 300);
        assert_eq!(v["ok"], false);
    }
}
