use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use refacer::{Config, FaceConfig, FaceConfigFile, RefaceOptions, Refacer};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "refacer", about = "Replace faces in videos and images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reface a video (GIF inputs also get a GIF export)
    Video {
        input: PathBuf,
        #[command(flatten)]
        faces: FaceArgs,
        /// Render every n-th frame only, without audio
        #[arg(long)]
        preview: bool,
    },
    /// Reface a still image
    Image {
        input: PathBuf,
        #[command(flatten)]
        faces: FaceArgs,
    },
    /// Save each detected face of an image as a PNG crop
    Extract {
        input: PathBuf,
        /// Maximum number of faces to extract
        #[arg(long)]
        max: Option<usize>,
        /// Directory for the crops (default: temporary files)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show which video encoder would be used
    Encoders,
}

#[derive(Args)]
struct FaceArgs {
    /// TOML file with [[faces]] entries
    #[arg(long, conflicts_with = "destination")]
    faces: Option<PathBuf>,
    /// Image with the replacement face
    #[arg(long)]
    destination: Option<PathBuf>,
    /// Image with the face to replace
    #[arg(long, requires = "destination")]
    origin: Option<PathBuf>,
    /// Similarity threshold for --origin
    #[arg(long, requires = "origin")]
    threshold: Option<f32>,
    /// Replace faces without comparing against origins
    #[arg(long)]
    disable_similarity: bool,
    /// Assign replacements to faces left to right
    #[arg(long)]
    multiple_faces: bool,
}

impl FaceArgs {
    fn face_configs(&self) -> Result<Vec<FaceConfig>> {
        if let Some(path) = &self.faces {
            let file = FaceConfigFile::load(path)
                .with_context(|| format!("reading face config {}", path.display()))?;
            return Ok(file.faces);
        }

        let Some(destination) = &self.destination else {
            bail!("pass --faces FILE or --destination IMAGE");
        };
        Ok(vec![FaceConfig {
            destination: Some(destination.clone()),
            origin: self.origin.clone(),
            threshold: self.threshold,
        }])
    }

    fn options(&self, preview: bool) -> RefaceOptions {
        RefaceOptions {
            preview,
            disable_similarity: self.disable_similarity,
            multiple_faces: self.multiple_faces,
        }
    }
}

fn load_refacer(config: Config) -> Result<Refacer> {
    let refacer = Refacer::new(config).context("loading face models")?;
    tracing::info!(
        backend = %refacer.config().effective_backend(),
        output_dir = %refacer.config().output_dir.display(),
        codec = %refacer.encoder().codec,
        workers = refacer.workers(),
        "refacer ready"
    );
    Ok(refacer)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Video {
            input,
            faces,
            preview,
        } => {
            let configs = faces.face_configs()?;
            let refacer = load_refacer(config)?;
            let outcome = refacer
                .reface_video(&input, &configs, &faces.options(preview))
                .with_context(|| format!("refacing {}", input.display()))?;

            println!("Refaced video saved at: {}", outcome.video.display());
            if let Some(gif) = outcome.gif {
                println!("GIF saved at: {}", gif.display());
            }
            println!(
                "{} frames in {} batches",
                outcome.report.frames,
                outcome.report.batches.len()
            );
        }
        Commands::Image { input, faces } => {
            let configs = faces.face_configs()?;
            let refacer = load_refacer(config)?;
            let path = refacer
                .reface_image(&input, &configs, &faces.options(false))
                .with_context(|| format!("refacing {}", input.display()))?;
            println!("Refaced image saved at: {}", path.display());
        }
        Commands::Extract { input, max, out } => {
            let refacer = load_refacer(config)?;
            let crops = refacer
                .extract_faces(&input, max, out.as_deref())
                .with_context(|| format!("extracting faces from {}", input.display()))?;
            if crops.is_empty() {
                println!("No faces found");
            }
            for crop in crops {
                println!("{}", crop.display());
            }
        }
        Commands::Encoders => {
            let choice = reface_media::probe_encoder();
            println!("encoder: {}", choice.codec);
            println!("bitrate: {}", choice.bitrate);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_face_flags_build_single_config() {
        let cli = Cli::parse_from([
            "refacer", "image", "in.jpg", "--destination", "alice.jpg", "--origin", "bob.jpg",
            "--threshold", "0.3",
        ]);
        let Commands::Image { faces, .. } = cli.command else {
            panic!("expected image subcommand");
        };

        let configs = faces.face_configs().unwrap();
        assert_eq!(
            configs,
            [FaceConfig::new("alice.jpg").with_origin("bob.jpg").with_threshold(0.3)]
        );
        assert_eq!(faces.options(false), RefaceOptions::default());
    }

    #[test]
    fn test_video_mode_flags() {
        let cli = Cli::parse_from([
            "refacer", "video", "in.mp4", "--destination", "a.jpg", "--preview",
            "--multiple-faces",
        ]);
        let Commands::Video { faces, preview, .. } = cli.command else {
            panic!("expected video subcommand");
        };

        let options = faces.options(preview);
        assert!(options.preview && options.multiple_faces && !options.disable_similarity);
    }

    #[test]
    fn test_faces_required() {
        let cli = Cli::parse_from(["refacer", "image", "in.jpg"]);
        let Commands::Image { faces, .. } = cli.command else {
            panic!("expected image subcommand");
        };
        assert!(faces.face_configs().is_err());
    }

    #[test]
    fn test_origin_requires_destination() {
        assert!(Cli::try_parse_from(["refacer", "image", "in.jpg", "--origin", "bob.jpg"]).is_err());
    }
}
