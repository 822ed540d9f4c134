use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use vision_core::overlay::annotate;
use vision_core::{
    AnalysisPipeline, AnalysisResult, DeviceMode, Frame, OnnxModelProvider, PipelineConfig,
    ResizeMode,
};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DeviceArg {
    Cpu,
    Gpu,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ResizeArg {
    Fast,
    Balanced,
    Quality,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum TextMode {
    Console,
    Json,
    Silent,
}

#[derive(Parser, Debug)]
#[command(
    name = "skin_scan",
    about = "Skin condition and object analysis over an image or a directory of frames"
)]
struct Cli {
    /// Image file, or a directory whose images are read in name order as a stream.
    input: PathBuf,
    /// Pipeline config (TOML). Defaults to $SKIN_SCAN_CONFIG, then ./skin-scan.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured device; GPU falls back to CPU.
    #[arg(long, value_enum)]
    device: Option<DeviceArg>,
    /// Overrides the configured resize quality.
    #[arg(long, value_enum)]
    resize: Option<ResizeArg>,
    #[arg(long, value_enum, default_value_t = TextMode::Console)]
    textmode: TextMode,
    /// Annotated output. A file for a single image, a directory for a stream.
    #[arg(long)]
    outfile: Option<PathBuf>,
    /// Print loaded models with their inputs and outputs.
    #[arg(long)]
    show_models: bool,
    /// Store every analyzed frame as feedback under this label.
    #[arg(long)]
    feedback_label: Option<String>,
    #[arg(long, default_value_t = 1.0)]
    feedback_confidence: f32,
    /// Per-frame analysis budget; a frame over budget is abandoned.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn init_logging() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(d) = "vision_core=info".parse() {
        filter = filter.add_directive(d);
    }
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::load(),
    };
    if let Some(device) = cli.device {
        config.device = match device {
            DeviceArg::Cpu => DeviceMode::Cpu,
            DeviceArg::Gpu => DeviceMode::Gpu,
        };
    }
    if let Some(resize) = cli.resize {
        config.resize = match resize {
            ResizeArg::Fast => ResizeMode::Fast,
            ResizeArg::Balanced => ResizeMode::Balanced,
            ResizeArg::Quality => ResizeMode::Quality,
        };
    }
    Ok(config)
}

fn is_image(path: &Path) -> bool {
    path.is_file() && image::ImageFormat::from_path(path).is_ok()
}

fn collect_frames(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_dir() {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(input)
            .with_context(|| format!("reading {}", input.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image(p))
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(anyhow!("no images found in {}", input.display()));
        }
        Ok(frames)
    } else if input.exists() {
        Ok(vec![input.to_path_buf()])
    } else {
        Err(anyhow!("input {} not found", input.display()))
    }
}

fn out_path_for(cli: &Cli, frame_path: &Path, stream: bool) -> Option<PathBuf> {
    let out = cli.outfile.as_ref()?;
    if !stream {
        return Some(out.clone());
    }
    let stem = frame_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frame");
    Some(out.join(format!("{stem}-out.jpg")))
}

fn print_result(path: &Path, result: &AnalysisResult) {
    println!("Frame #{} ({})", result.frame_id, path.display());
    println!("  Objects: {}", result.objects.len());
    for obj in &result.objects {
        let b = &obj.bounding_box;
        let motion = match &obj.tracking {
            Some(t) if t.stable => "stable".to_string(),
            Some(t) => format!("moving {:.2}/s", t.velocity.speed()),
            None => "-".to_string(),
        };
        println!(
            "    - {} {:.2} [{:.2},{:.2},{:.2},{:.2}] id={} {}",
            obj.label, obj.confidence, b.x, b.y, b.width, b.height, obj.id, motion
        );
    }
    println!("  Skin conditions: {}", result.skin_conditions.len());
    for cond in &result.skin_conditions {
        println!(
            "    - {} severity={:.1} region={}",
            cond.kind.as_str(),
            cond.severity,
            cond.location.region
        );
        for rec in &cond.recommendations {
            println!("        * {rec}");
        }
    }
    println!("  Confidence: {:.2}", result.confidence);
    println!("  Time: {:.1} ms", result.processing_time_ms);
}

async fn run(cli: &Cli) -> Result<()> {
    let console = cli.textmode == TextMode::Console;
    let config = load_config(cli)?;
    let frames = collect_frames(&cli.input)?;
    let stream = frames.len() > 1 || cli.input.is_dir();
    if stream {
        if let Some(dir) = &cli.outfile {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
    }

    if console {
        println!("Loading models...");
    }
    let pipeline = Arc::new(AnalysisPipeline::new(
        config.clone(),
        Box::new(OnnxModelProvider::new(config)),
    ));
    pipeline.initialize()?;
    let status = pipeline.status();
    info!(?status, "pipeline ready");

    if cli.show_models && console {
        for model in pipeline.model_summaries() {
            println!("Model: {}", model.name);
            println!("  Path: {}", model.path);
            println!("  Inputs: {}", model.inputs.len());
            for input in &model.inputs {
                println!("    - {input}");
            }
            println!("  Outputs: {}", model.outputs.len());
            for output in &model.outputs {
                println!("    - {output}");
            }
        }
    }

    for (id, path) in frames.iter().enumerate() {
        let rgb = image::open(path)
            .with_context(|| format!("opening {}", path.display()))?
            .to_rgb8();
        let frame = Frame::new(id as u64, rgb);

        let analysis = pipeline.analyze_frame(&frame);
        let result = match cli.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), analysis).await {
                Ok(res) => res?,
                Err(_) => {
                    warn!(frame = %path.display(), budget_ms = ms, "frame over budget, skipped");
                    continue;
                }
            },
            None => analysis.await?,
        };

        match cli.textmode {
            TextMode::Console => print_result(path, &result),
            TextMode::Json => {
                let out = json!({
                    "result": 0,
                    "input": path.display().to_string(),
                    "width": frame.width(),
                    "height": frame.height(),
                    "analysis": &result,
                });
                println!("{}", serde_json::to_string(&out)?);
            }
            TextMode::Silent => {}
        }

        if let Some(label) = &cli.feedback_label {
            pipeline.learn_from_feedback(&frame, label, cli.feedback_confidence)?;
        }

        if let Some(out_path) = out_path_for(cli, path, stream) {
            annotate(&frame.image, &result)
                .save(&out_path)
                .with_context(|| format!("saving {}", out_path.display()))?;
            if console {
                println!("  Saved: {}", out_path.display());
            }
        }
    }

    let metrics = pipeline.performance_metrics();
    if console {
        println!(
            "Processed {} frame(s), avg {:.1} ms, last fps {}",
            metrics.total_processed, metrics.avg_processing_time_ms, metrics.fps
        );
        println!("Tracked objects: {}", pipeline.tracked_objects().len());
        if cli.feedback_label.is_some() {
            println!("Feedback samples: {}", pipeline.feedback_samples().len());
        }
    } else if cli.textmode == TextMode::Json {
        println!("{}", serde_json::to_string(&json!({ "metrics": metrics }))?);
    }

    pipeline.dispose();
    let live = pipeline.live_buffers();
    if live > 0 {
        warn!(live, "buffers still leased after dispose");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    if let Err(err) = run(&cli).await {
        let msg = format!("{err:#}");
        if cli.textmode == TextMode::Json {
            println!("{}", json!({ "result": 1, "msg": msg }));
        } else {
            eprintln!("{msg}");
        }
        std::process::exit(1);
    }
}
