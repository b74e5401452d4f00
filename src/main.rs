/*!
 * photo-uplink CLI
 *
 * Prepares a photo and uploads it with resumable retry, or lists the
 * objects under a prefix.
 */

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use photo_uplink::{
    config::{LogConfig, LogLevel},
    logging, ClientFactory, EncodingFormat, ImageSpec, ObjectLister, ServiceConfig, TransferId,
    UploadListener, UploadOrchestrator, UploadOutcome, UploadRequest, WatermarkLine,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "photo-uplink")]
#[command(version, about = "Prepare photos and upload them to S3 with resumable retry", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevelArg,

    /// Path to log file (default: stderr)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare an image and upload it
    Upload {
        /// Service configuration (TOML: bucket, identity_pool_id, region, base_url)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Destination folder inside the bucket
        #[arg(long, value_name = "PATH")]
        folder: String,

        /// Image to upload; rewritten in place
        #[arg(long, value_name = "FILE")]
        image: PathBuf,

        /// Maximum output width
        #[arg(long)]
        width: Option<u32>,

        /// Maximum output height
        #[arg(long)]
        height: Option<u32>,

        /// Output format
        #[arg(long, value_enum, default_value = "jpeg")]
        format: FormatArg,

        /// JPEG quality (1-100)
        #[arg(long, default_value = "80")]
        quality: u8,

        /// Watermark line as Label=Value (repeatable, top to bottom)
        #[arg(long = "watermark", value_name = "LABEL=VALUE")]
        watermark: Vec<String>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// List all objects under a prefix
    List {
        /// Bucket name
        #[arg(long)]
        bucket: String,

        /// Region identifier
        #[arg(long)]
        region: String,

        /// Identity pool id
        #[arg(long, default_value = "")]
        pool_id: String,

        /// Key prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum FormatArg {
    Jpeg,
    Png,
    Webp,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

/// Upload listener that drives a terminal progress bar
struct BarListener {
    bar: ProgressBar,
}

impl BarListener {
    fn new(visible: bool) -> anyhow::Result<Self> {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        Ok(Self { bar })
    }
}

impl UploadListener for BarListener {
    fn show_progress(&self) {
        self.bar.set_message("Uploading");
    }

    fn on_progress_changed(&self, _id: TransferId, current: f32, total: f32) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
    }

    fn on_success(&self, _url: &str) {
        self.bar.finish_with_message("Uploaded");
    }

    fn on_error(&self, message: &str, request: &UploadRequest) {
        self.bar.abandon_with_message(format!(
            "Upload of {} failed: {}",
            request.image.source_path.display(),
            message
        ));
    }

    fn on_state_changed(&self, label: &str) {
        self.bar.abandon_with_message(format!("Transfer {}", label));
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    logging::init_logging(&LogConfig {
        level: cli.log_level.into(),
        file: cli.log_file.clone(),
        verbose: cli.verbose,
    })?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let factory = Arc::new(ClientFactory::new());

    match cli.command {
        Commands::Upload {
            config,
            folder,
            image,
            width,
            height,
            format,
            quality,
            watermark,
            no_progress,
        } => {
            let service = ServiceConfig::from_toml_file(&config)?;
            let spec = build_spec(image, width, height, format, quality, &watermark)?;
            let request = UploadRequest::new(service, spec, folder.trim_end_matches('/'));
            let listener = BarListener::new(!no_progress && !cli.json)?;
            let orchestrator = UploadOrchestrator::new(factory);

            let outcome =
                match runtime.block_on(orchestrator.begin_upload(request, &listener, |_| {})) {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_config() => {
                        eprintln!("Configuration error: {}", e);
                        return Ok(ExitCode::from(2));
                    }
                    Err(e) => return Err(e.into()),
                };
            report_outcome(&outcome, cli.json)
        }
        Commands::List {
            bucket,
            region,
            pool_id,
            prefix,
        } => {
            let lister = ObjectLister::new(factory);
            let objects =
                runtime.block_on(lister.try_list_all(&bucket, &region, &pool_id, &prefix))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&objects)?);
            } else {
                for object in &objects {
                    println!("{:>10}  {}", object.size, object.url());
                }
                println!("{} object(s)", objects.len());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_spec(
    image: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    format: FormatArg,
    quality: u8,
    watermark: &[String],
) -> anyhow::Result<ImageSpec> {
    let format = match format {
        FormatArg::Jpeg => EncodingFormat::Jpeg { quality },
        FormatArg::Png => EncodingFormat::Png,
        FormatArg::Webp => EncodingFormat::Webp,
    };

    let lines = watermark
        .iter()
        .map(|raw| match raw.split_once('=') {
            Some((label, value)) => Ok(WatermarkLine::new(label.trim(), value.trim())),
            None => bail!("Watermark line must be LABEL=VALUE, got '{}'", raw),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut spec = ImageSpec::new(image).with_format(format).with_watermark(lines);
    spec.target_width = width;
    spec.target_height = height;
    Ok(spec)
}

fn report_outcome(outcome: &UploadOutcome, json: bool) -> anyhow::Result<ExitCode> {
    let (status, detail) = match outcome {
        UploadOutcome::Completed { url } => ("completed", Some(url.as_str())),
        UploadOutcome::Canceled => ("canceled", None),
        UploadOutcome::Failed => ("failed", None),
        UploadOutcome::Errored { message } => ("error", Some(message.as_str())),
    };

    if json {
        let value = serde_json::json!({ "status": status, "detail": detail });
        println!("{}", serde_json::to_string(&value)?);
    } else if let Some(detail) = detail {
        println!("{}: {}", status, detail);
    } else {
        println!("{}", status);
    }

    Ok(if matches!(outcome, UploadOutcome::Completed { .. }) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
