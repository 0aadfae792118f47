use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use photomatch_core::{
    collect_candidates, export_matches, write_report, DistanceMatcher, Matcher, PipelineOptions,
    ScanOptions,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::{Config, Overrides};
use engine::{finish_on_interrupt, spawn_engine};

#[derive(Parser)]
#[command(name = "photomatch", about = "Find the photos a reference face appears in")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/photomatch/config.toml, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find candidate photos containing the reference face
    Find {
        /// Clear photo of the face to look for
        reference: PathBuf,
        /// Photos or directories of photos to search
        #[arg(required = true)]
        candidates: Vec<PathBuf>,
        /// Copy matching photos into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Maximum embedding distance for a match (lower is stricter)
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// Extra jitter passes for the reference face
        #[arg(long)]
        reference_jitters: Option<usize>,
        /// Extra jitter passes for each candidate face
        #[arg(long)]
        candidate_jitters: Option<usize>,
        /// Search candidate directories recursively
        #[arg(short, long, conflicts_with = "no_recursive")]
        recursive: bool,
        /// Only search the top level of candidate directories
        #[arg(long)]
        no_recursive: bool,
        /// Include hidden files and directories
        #[arg(long)]
        hidden: bool,
        /// Write the full JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
        /// Print the full JSON report to stdout instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Detect and embed every face in a photo, printed as JSON
    Encode {
        image: PathBuf,
        /// Extra jitter passes per face
        #[arg(long, default_value_t = 0)]
        jitters: usize,
    },
    /// Compare the most confident faces of two photos
    Compare {
        first: PathBuf,
        second: PathBuf,
        /// Maximum embedding distance for a match
        #[arg(short, long)]
        tolerance: Option<f32>,
    },
    /// Show the model directory and which model files are present
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Find {
            reference,
            candidates,
            output,
            tolerance,
            reference_jitters,
            candidate_jitters,
            recursive,
            no_recursive,
            hidden,
            report,
            json,
        } => {
            config.apply_overrides(Overrides {
                tolerance,
                reference_jitters,
                candidate_jitters,
                recursive: match (recursive, no_recursive) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            });
            config.validate()?;

            let scan = ScanOptions {
                recursive: config.recursive,
                include_hidden: hidden,
            };
            let candidates = collect_candidates(&candidates, &scan)?;
            if candidates.is_empty() {
                bail!("no candidate photos found (accepted: .png, .jpg, .jpeg)");
            }

            let engine = spawn_engine(
                &config.scrfd_model_path(),
                &config.arcface_model_path(),
                config.intra_threads,
            )?;
            let options = PipelineOptions {
                reference_jitters: config.reference_jitters,
                candidate_jitters: config.candidate_jitters,
            };

            let result = finish_on_interrupt(
                engine.find(reference, candidates, config.tolerance, options),
                async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                },
                || {
                    tracing::warn!("interrupted, stopping after the current photo");
                    engine.cancel();
                },
            )
            .await?;

            if let Some(path) = &report {
                write_report(&result, path)?;
                tracing::info!(path = %path.display(), "report written");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let summary = result.summary();
                match summary.matched {
                    0 => println!("No matching photos found."),
                    1 => println!("Found 1 matching photo."),
                    n => println!("Found {n} matching photos."),
                }
                for candidate in result.matches() {
                    println!("  {}", candidate.path.display());
                }
                println!(
                    "Scanned {}: {} matched, {} wrong face, {} no face, {} failed.",
                    summary.total, summary.matched, summary.wrong_face, summary.no_face, summary.failed
                );
            }

            if let Some(dir) = &output {
                if result.match_count() > 0 {
                    let exported = export_matches(&result, dir)?;
                    if !json {
                        println!("Copied {} photo(s) to {}", exported.copied.len(), dir.display());
                        for err in &exported.failed {
                            println!("  skipped: {err}");
                        }
                    }
                }
            }
        }
        Commands::Encode { image, jitters } => {
            config.validate()?;
            let engine = spawn_engine(
                &config.scrfd_model_path(),
                &config.arcface_model_path(),
                config.intra_threads,
            )?;
            let faces = engine.encode(image, jitters).await?;
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::Compare {
            first,
            second,
            tolerance,
        } => {
            config.apply_overrides(Overrides {
                tolerance,
                ..Overrides::default()
            });
            config.validate()?;

            let engine = spawn_engine(
                &config.scrfd_model_path(),
                &config.arcface_model_path(),
                config.intra_threads,
            )?;

            let a = engine
                .encode(first.clone(), config.reference_jitters)
                .await?
                .into_iter()
                .next()
                .with_context(|| format!("no face found in {}", first.display()))?;
            let faces_b: Vec<_> = engine
                .encode(second.clone(), config.candidate_jitters)
                .await?
                .into_iter()
                .map(|face| face.embedding)
                .collect();
            if faces_b.is_empty() {
                bail!("no face found in {}", second.display());
            }

            let result = DistanceMatcher::new(config.tolerance).compare(&a.embedding, &faces_b);
            let Some((distance, idx)) = result.distance.zip(result.face_index) else {
                bail!("embeddings are not comparable");
            };
            println!("distance:   {distance:.4}");
            println!("similarity: {:.4}", a.embedding.similarity(&faces_b[idx]));
            println!(
                "match:      {} (tolerance {:.2}, face {} of {})",
                if result.matched { "yes" } else { "no" },
                config.tolerance,
                idx + 1,
                faces_b.len()
            );
        }
        Commands::Models => {
            println!("model dir: {}", config.model_dir.display());
            for path in [config.scrfd_model_path(), config.arcface_model_path()] {
                let state = if path.is_file() { "ok" } else { "missing" };
                println!("  {state:7} {}", path.display());
            }
        }
    }

    Ok(())
}
