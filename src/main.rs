use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use tracing::{Level, error, info};

use dicom_roi_codec::{
    DeflateCodec, EncodedLayout, PipelineConfig,
    pipeline::{decode_series, encode_directory},
    validator::validate_series,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log every slice
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress the regions of interest of a DICOM series
    Encode {
        /// Directory containing the .dcm slices
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving manifest, containers and metadata-only records
        #[arg(short, long)]
        output: PathBuf,

        /// Samples at or below this value are ignored when estimating the threshold
        #[arg(long, default_value_t = PipelineConfig::default().noise_floor)]
        noise_floor: u16,

        /// Threshold used when no sample clears the noise floor
        #[arg(long, default_value_t = PipelineConfig::default().default_threshold)]
        default_threshold: f64,

        /// Minimum bounding box span on each axis
        #[arg(long, default_value_t = PipelineConfig::default().min_region_size)]
        min_region_size: usize,

        /// Codec block size
        #[arg(long, default_value_t = PipelineConfig::default().block_size)]
        block_size: usize,

        /// Deflate level of the built-in codec (0-9)
        #[arg(long, default_value_t = 6)]
        level: u32,
    },

    /// Restore full-size DICOM files from an encoded series
    Decode {
        /// Directory written by `encode`
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the restored .dcm files
        #[arg(short, long)]
        output: PathBuf,

        /// Minimum bounding box span the manifest is checked against
        #[arg(long, default_value_t = PipelineConfig::default().min_region_size)]
        min_region_size: usize,
    },

    /// Compare key attributes of an original and a restored series
    Validate {
        original: PathBuf,
        restored: PathBuf,
    },
}

fn run(command: Command) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Command::Encode {
            input,
            output,
            noise_floor,
            default_threshold,
            min_region_size,
            block_size,
            level,
        } => {
            let config = PipelineConfig {
                noise_floor,
                default_threshold,
                min_region_size,
                block_size,
            };
            let codec = DeflateCodec::new(block_size, level);
            let report = encode_directory(&input, &EncodedLayout::new(output), &codec, &config)?;
            info!(
                threshold = report.threshold,
                bytes = report.container_bytes,
                "{} of {} slices compressed, {} kept as fallback rasters",
                report.compressed,
                report.slice_count,
                report.fallback
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Decode {
            input,
            output,
            min_region_size,
        } => {
            let config = PipelineConfig {
                min_region_size,
                ..Default::default()
            };
            // the block size only matters for compression
            let codec = DeflateCodec::default();
            let report = decode_series(&EncodedLayout::new(input), &output, &codec, &config)?;
            info!(
                "{} slices restored ({} from containers, {} from fallback rasters, {} blank)",
                report.restored, report.from_container, report.from_fallback, report.blank
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { original, restored } => {
            let report = validate_series(&original, &restored)?;
            println!("{report}");
            Ok(if report.is_consistent() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    if let Err(e) = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .finish(),
    ) {
        eprintln!("[ERROR] Could not set up global logging subscriber: {e}");
    }

    run(args.command).unwrap_or_else(|e| {
        error!("{e}");
        ExitCode::FAILURE
    })
}
