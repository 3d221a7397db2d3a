use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facenet_core::decode::{self, MIN_IMAGE_SIZE};
use facenet_core::normalize::ResizeFilter;
use facenet_core::{ConfidencePolicy, FacePipeline, PipelineConfig};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facenet", about = "FaceNet face embedding CLI")]
struct Cli {
    #[command(flatten)]
    models: ModelArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Directory holding det_500m.onnx and facenet.onnx
    #[arg(long, env = "FACENET_MODEL_DIR", global = true)]
    model_dir: Option<PathBuf>,

    /// Detector model path (overrides --model-dir)
    #[arg(long, env = "FACENET_DETECTOR_MODEL", global = true)]
    detector: Option<PathBuf>,

    /// FaceNet model path (overrides --model-dir)
    #[arg(long, env = "FACENET_EMBEDDER_MODEL", global = true)]
    embedder: Option<PathBuf>,

    /// ONNX Runtime intra-op threads
    #[arg(long, default_value_t = 2, global = true)]
    threads: usize,

    /// Accept any detection regardless of confidence
    #[arg(long, global = true)]
    lenient: bool,

    /// Minimum Laplacian variance of the face crop
    #[arg(long, global = true)]
    min_sharpness: Option<f64>,

    /// Resize filter for the 160x160 face: cubic, linear or nearest
    #[arg(long, global = true)]
    resize_filter: Option<ResizeFilter>,

    /// Run CLAHE contrast enhancement before detection
    #[arg(long, global = true)]
    enhance: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of the face in an image
    Embed {
        image: PathBuf,
    },
    /// Score the face detection of an image
    Detect {
        image: PathBuf,
    },
    /// Compare the faces of two images
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
    /// Load the models and run the detector self-test
    Health,
}

impl ModelArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        if self.lenient {
            config.quality.confidence = ConfidencePolicy::Lenient;
        }
        if let Some(min) = self.min_sharpness {
            config.quality.min_sharpness = min;
        }
        if let Some(filter) = self.resize_filter {
            config.resize_filter = filter;
        }
        config.contrast_enhancement = self.enhance;
        config
    }

    fn load(&self) -> Result<FacePipeline> {
        let model_dir = self
            .model_dir
            .clone()
            .unwrap_or_else(facenet_core::default_model_dir);
        let detector = self
            .detector
            .clone()
            .unwrap_or_else(|| model_dir.join(facenet_core::DETECTOR_MODEL_FILE));
        let embedder = self
            .embedder
            .clone()
            .unwrap_or_else(|| model_dir.join(facenet_core::EMBEDDER_MODEL_FILE));

        tracing::debug!(detector = %detector.display(), embedder = %embedder.display(), "loading models");
        FacePipeline::load(&detector, &embedder, self.pipeline_config(), self.threads)
            .context("loading models")
    }
}

fn read_image(path: &Path) -> Result<image::RgbImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let image = decode::decode_image(&bytes).with_context(|| format!("decoding {}", path.display()))?;
    decode::ensure_min_size(&image, MIN_IMAGE_SIZE)
        .with_context(|| format!("checking {}", path.display()))?;
    Ok(image)
}

fn embed(pipeline: &FacePipeline, path: &Path) -> Result<facenet_core::Embedding> {
    let image = read_image(path)?;
    pipeline
        .extract_embedding(&image)
        .with_context(|| format!("embedding {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pipeline = cli.models.load()?;

    let output = match &cli.command {
        Commands::Embed { image } => {
            let embedding = embed(&pipeline, image)?;
            json!({ "embeddings": embedding.values })
        }
        Commands::Detect { image } => {
            let report = pipeline.detect_report(&read_image(image)?)?;
            serde_json::to_value(report)?
        }
        Commands::Compare { first, second } => {
            let a = embed(&pipeline, first)?;
            let b = embed(&pipeline, second)?;
            serde_json::to_value(pipeline.compare_embeddings(&a, &b)?)?
        }
        Commands::Health => {
            let detected = pipeline.smoke_test()?;
            json!({ "status": "ok", "face_detection_test": detected })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
