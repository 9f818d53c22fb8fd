use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::FaceExtractor;
use std::path::PathBuf;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance reconciliation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a group photo and roster for reconciliation
    Reconcile {
        /// Attendance identifier
        #[arg(long)]
        attendance_id: String,
        /// URL of the group photo
        #[arg(long)]
        image_url: String,
        /// JSON file holding the roster: [{"id": ..., "imageUrl": ...}, ...]
        #[arg(long)]
        roster: PathBuf,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Show daemon status
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Detect faces in a local image without the daemon
    Extract {
        /// Image file to analyse
        image: PathBuf,
        /// Directory containing the ONNX models
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile {
            attendance_id,
            image_url,
            roster,
            server,
        } => {
            let text = std::fs::read_to_string(&roster)
                .with_context(|| format!("reading roster {}", roster.display()))?;
            let students: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing roster {}", roster.display()))?;
            if !students.is_array() {
                bail!("roster must be a JSON array of students");
            }
            let body = serde_json::json!({
                "attendanceId": attendance_id,
                "attendanceImageUrl": image_url,
                "students": students,
            });

            let response = reqwest::Client::new()
                .post(format!("{}/process_image", server.trim_end_matches('/')))
                .json(&body)
                .send()
                .await
                .with_context(|| format!("contacting {server}"))?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                bail!("reconciliation failed ({status}): {text}");
            }
            print_json(&text)?;
        }
        Commands::Status { server } => {
            let response = reqwest::get(format!("{}/status", server.trim_end_matches('/')))
                .await
                .with_context(|| format!("rollcalld not reachable at {server}"))?
                .error_for_status()?;
            print_json(&response.text().await?)?;
        }
        Commands::Extract { image, model_dir } => {
            let model_dir = model_dir.unwrap_or_else(rollcall_core::default_model_dir);
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let mut extractor = FaceExtractor::load(&model_dir)
                .with_context(|| format!("loading models from {}", model_dir.display()))?;
            let faces = extractor.extract(&bytes)?;

            let report: Vec<_> = faces
                .iter()
                .map(|face| {
                    serde_json::json!({
                        "x": face.location.x,
                        "y": face.location.y,
                        "width": face.location.width,
                        "height": face.location.height,
                        "confidence": face.location.confidence,
                        "dimension": face.signature.dimension(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&report)?);
            tracing::info!(faces = faces.len(), "extraction complete");
        }
    }

    Ok(())
}

fn print_json(text: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(text).context("daemon returned non-JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
