use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use common::log_setup::setup_logging;
use pixel_flow::config::{ConfigFile, SourceSection};
use pixel_flow::prelude::*;
use tracing::info;

/// Push randomly generated grayscale images through the bounded analysis pipeline.
///
/// Command line values override those read from `--config`.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// YAML or JSON file with pipeline and source settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pixel value searched for by the target-value analysis (0..=255).
    #[arg(short = 'b', long, allow_negative_numbers = true)]
    target_value: Option<i64>,

    /// Maximum number of images in flight.
    #[arg(short = 'l', long, allow_negative_numbers = true)]
    concurrency_limit: Option<i64>,

    /// File receiving one average per image.
    #[arg(short = 'f', long)]
    log_file: Option<PathBuf>,

    /// Number of images to generate.
    #[arg(short = 'n', long)]
    images: Option<i64>,

    #[arg(long)]
    width: Option<i64>,

    #[arg(long)]
    height: Option<i64>,

    /// Seed for reproducible images.
    #[arg(long)]
    seed: Option<u64>,

    /// Feed one generated image repeatedly instead of distinct images.
    #[arg(long)]
    repeat: bool,

    /// Base tracing filter, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the rolling diagnostic log.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

impl Args {
    fn overrides(&self) -> ConfigFile {
        ConfigFile {
            target_value: self.target_value,
            concurrency_limit: self.concurrency_limit,
            log_path: self.log_file.clone(),
            source: SourceSection {
                image_count: self.images,
                width: self.width,
                height: self.height,
                seed: self.seed,
                mode: self.repeat.then_some(SourceMode::Repeat),
            },
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let base = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    Ok(base.merged(&args.overrides())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level, &args.log_dir)?;

    let config = load_config(&args)?;
    info!(?config, "configuration loaded");

    let source = config.source.build()?;
    let stats = Pipeline::new(config.pipeline).run(source).await?;

    println!(
        "processed {} images (peak {} in flight) in {:.3}s",
        stats.released, stats.peak_in_flight, stats.elapsed_secs
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_defaults() -> anyhow::Result<()> {
        let args = Args::try_parse_from(["pixel_flow", "-b", "7", "-l", "2", "-n", "3", "--repeat"])?;
        let config = load_config(&args)?;

        assert_eq!(config.pipeline.target_value, 7);
        assert_eq!(config.pipeline.concurrency_limit, 2);
        assert_eq!(config.source.image_count, 3);
        assert_eq!(config.source.mode, SourceMode::Repeat);
        Ok(())
    }

    #[test]
    fn invalid_limit_is_rejected() -> anyhow::Result<()> {
        let args = Args::try_parse_from(["pixel_flow", "-l", "0"])?;
        assert!(load_config(&args).is_err());

        let args = Args::try_parse_from(["pixel_flow", "-b", "-4"])?;
        assert!(load_config(&args).is_err());

        let args = Args::try_parse_from(["pixel_flow", "-l", "1152921504606846976"])?;
        assert!(load_config(&args).is_err());
        Ok(())
    }
}
