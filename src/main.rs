//! Checkout Vision - command line front end
//!
//! Runs the product recognition core against local files and prints JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use checkout_vision::config::{self, AppConfig};
use checkout_vision::storage;
use checkout_vision::{FeedbackSubmission, ImageInput, Scanner};

/// Checkout Vision - grocery product recognition
#[derive(Parser, Debug)]
#[command(name = "checkout-vision")]
#[command(about = "Identify grocery products from images and collect feedback for retraining")]
struct Args {
    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify the product in an image
    Scan {
        /// Image file to scan
        #[arg(required_unless_present = "data_url", conflicts_with = "data_url")]
        image: Option<PathBuf>,

        /// Base64 data URL instead of a file
        #[arg(long)]
        data_url: Option<String>,

        #[arg(long)]
        user: Option<String>,
    },

    /// Look up a product by barcode
    Barcode { code: String },

    /// Confirm or correct the label of a scanned image
    Feedback {
        /// Image reference returned by a previous scan
        #[arg(long)]
        image_ref: String,

        /// Correct product label
        #[arg(long)]
        label: String,

        /// The scan result was wrong and `label` is a correction
        #[arg(long)]
        rejected: bool,

        #[arg(long)]
        user: Option<String>,
    },

    /// Add a labeled image for a new or existing product
    Teach {
        image: PathBuf,

        #[arg(long)]
        label: String,

        #[arg(long)]
        user: Option<String>,
    },

    /// Retrain the model on collected feedback
    Retrain {
        /// Only retrain if enough feedback is pending
        #[arg(long)]
        if_due: bool,
    },

    /// List catalog products
    Products,

    /// Show the latest training metrics
    Metrics,

    /// Show recently recorded scans
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Write a default configuration file
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::InitConfig { path, force } = &args.command {
        return init_config(path, *force);
    }

    let config = load_or_default_config(args.config.as_deref())?;
    let scanner = Scanner::from_config(&config)?;
    info!("Scanner ready ({} products, {:?} inference)", scanner.catalog().len(), scanner.inference_source());

    match args.command {
        Command::Scan { image, data_url, user } => {
            let input = match (image, data_url) {
                (Some(path), _) => ImageInput::Bytes(
                    std::fs::read(&path).with_context(|| format!("Failed to read image {:?}", path))?,
                ),
                (None, Some(data_url)) => ImageInput::DataUrl(data_url),
                (None, None) => bail!("an image path or --data-url is required"),
            };
            print_json(&scanner.scan(input, user.as_deref())?)
        }
        Command::Barcode { code } => match scanner.scan_barcode(&code) {
            Some(product) => print_json(&product),
            None => print_json(&serde_json::json!({ "status": "not_found", "barcode": code })),
        },
        Command::Feedback {
            image_ref,
            label,
            rejected,
            user,
        } => print_json(&scanner.submit_feedback(FeedbackSubmission {
            image_reference: image_ref,
            label,
            user_confirmed: !rejected,
            user_id: user,
        })),
        Command::Teach { image, label, user } => {
            let bytes = std::fs::read(&image).with_context(|| format!("Failed to read image {:?}", image))?;
            print_json(&scanner.add_training_item(ImageInput::Bytes(bytes), &label, user.as_deref())?)
        }
        Command::Retrain { if_due } => {
            if if_due {
                match scanner.retrain_if_due()? {
                    Some(metrics) => print_json(&metrics),
                    None => print_json(&serde_json::json!({ "status": "not_due" })),
                }
            } else {
                print_json(&scanner.retrain()?)
            }
        }
        Command::Products => print_json(&scanner.products().collect::<Vec<_>>()),
        Command::Metrics => print_json(&serde_json::json!({
            "inference_source": scanner.inference_source(),
            "latest": scanner.latest_metrics()?,
        })),
        Command::History { limit } => print_json(&scanner.recent_scans(limit)?),
        Command::InitConfig { .. } => Ok(()),
    }
}

/// Load the given config, or the default file if present, or defaults
fn load_or_default_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    config::save_config(&AppConfig::default(), path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
