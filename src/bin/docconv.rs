//! CLI binary for edgequake-docconv.
//!
//! `docconv serve` runs the HTTP service; the other subcommands run one
//! conversion locally against the same library code and write the result
//! to disk.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_docconv::server::{self, AppState};
use edgequake_docconv::{
    images_to_pdf, stream, ArtifactRegistry, ConversionProgressCallback, ConvertedOutput,
    ImagesToPdfRequest, Orientation, PageSizePolicy, PdfToImagesRequest, ProgressCallback,
    Rasterizer, ServiceConfig, SourceRef,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress bar fed by the conversion's page events.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_prefix("Writing");
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, _page_num: usize, _total: usize, _bytes: usize) {
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total,
            red(error)
        ));
    }

    fn on_conversion_complete(&self, _total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages written",
            green("✔"),
            bold(&success_count.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  docconv serve --bind 0.0.0.0:8080 --scratch-root /var/tmp/docconv

  # Compose images into an A4 PDF with a half-inch margin
  docconv images-to-pdf scan-1.jpg scan-2.png --page-size a4 --margin 36 -o scans.pdf

  # Rasterise a PDF into a ZIP of PNG pages
  docconv pdf-to-images report.pdf --dpi 200 -o report-pages.zip

HTTP API:
  POST /api/upload/chunk            multipart: uploadId, index, chunk
  POST /api/upload/assemble         JSON: {"uploadId": "...", "filename": "..."}
  POST /api/convert/images-to-pdf   multipart: images / tempKey, pageSize, orientation,
                                    margin, quality, outputName
  POST /api/convert/pdf-to-images   multipart: file / tempKey, outputName
  GET  /health

REQUIREMENTS:
  pdf-to-images needs pdftoppm (poppler-utils). Without it the rest of the
  service keeps working and that endpoint answers with an 'unavailable' error.
"#;

/// Chunked uploads, image → PDF and PDF → image conversion.
#[derive(Parser, Debug)]
#[command(
    name = "docconv",
    version,
    about = "Chunked uploads, image to PDF and PDF to image conversion",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCCONV_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Compose one or more images into a PDF.
    ImagesToPdf(ImagesToPdfArgs),
    /// Rasterise a PDF into a ZIP of PNG pages.
    PdfToImages(PdfToImagesArgs),
}

/// Settings shared by the server and the local rasteriser.
#[derive(Args, Debug)]
struct EngineArgs {
    /// Root directory for chunks, assembled files and rasteriser output.
    #[arg(long, env = "DOCCONV_SCRATCH_ROOT")]
    scratch_root: Option<PathBuf>,

    /// Rasteriser executable.
    #[arg(long, env = "DOCCONV_RASTERIZER", default_value = "pdftoppm")]
    rasterizer: String,

    /// Rasterisation DPI (72–600).
    #[arg(long, env = "DOCCONV_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Upper bound on one rasteriser run, in seconds.
    #[arg(long, env = "DOCCONV_PROCESS_TIMEOUT", default_value_t = 120)]
    process_timeout: u64,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "DOCCONV_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    #[command(flatten)]
    engine: EngineArgs,

    /// Maximum live registry keys.
    #[arg(long, env = "DOCCONV_REGISTRY_CAPACITY", default_value_t = 1024)]
    registry_capacity: usize,

    /// Registry key lifetime, in seconds.
    #[arg(long, env = "DOCCONV_REGISTRY_TTL", default_value_t = 3600)]
    registry_ttl: u64,

    /// Seconds between scratch sweeps.
    #[arg(long, env = "DOCCONV_REAPER_INTERVAL", default_value_t = 300)]
    reaper_interval: u64,

    /// Age in seconds after which scratch entries are swept.
    #[arg(long, env = "DOCCONV_REAPER_MAX_AGE", default_value_t = 3600)]
    reaper_max_age: u64,

    /// Maximum request body, in MiB.
    #[arg(long, env = "DOCCONV_MAX_REQUEST_MB", default_value_t = 512)]
    max_request_mb: usize,

    /// Comma-separated origins allowed by CORS (`*` for any). Empty disables CORS.
    #[arg(long, env = "DOCCONV_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

#[derive(Args, Debug)]
struct ImagesToPdfArgs {
    /// Image files, one page each, in order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output PDF path. Default: `converted.pdf`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Page size: auto, a4 or letter.
    #[arg(long, default_value = "auto")]
    page_size: PageSizePolicy,

    /// Orientation for preset page sizes: portrait or landscape.
    #[arg(long, default_value = "portrait")]
    orientation: Orientation,

    /// Margin in points.
    #[arg(long, default_value_t = 0.0)]
    margin: f64,

    /// JPEG quality (1–100).
    #[arg(long, default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Disable progress bar.
    #[arg(long, env = "DOCCONV_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct PdfToImagesArgs {
    /// PDF file.
    input: PathBuf,

    /// Output ZIP path. Default: `pages.zip`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    engine: EngineArgs,

    /// Disable progress bar.
    #[arg(long, env = "DOCCONV_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => run_server(args).await,
        Command::ImagesToPdf(args) => run_images_to_pdf(args, cli.quiet).await,
        Command::PdfToImages(args) => run_pdf_to_images(args, cli.quiet).await,
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────

async fn run_server(args: ServeArgs) -> Result<()> {
    let config = engine_config(&args.engine)
        .registry_capacity(args.registry_capacity)
        .registry_ttl(Duration::from_secs(args.registry_ttl))
        .reaper_interval(Duration::from_secs(args.reaper_interval))
        .reaper_max_age(Duration::from_secs(args.reaper_max_age))
        .max_request_bytes(args.max_request_mb.saturating_mul(1024 * 1024))
        .allowed_origins(
            args.allowed_origins
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        )
        .build()
        .context("Invalid configuration")?;

    let state = AppState::new(config);
    state
        .scratch
        .prepare()
        .await
        .context("Failed to prepare scratch directory")?;
    info!("Scratch root: {}", state.scratch.root().display());

    let capability = state.rasterizer.capability();
    if !capability.ensure().await {
        warn!(
            "'{}' not found; PDF → images requests will fail until it is installed",
            capability.program()
        );
    }

    let _reaper = state.reaper().spawn();
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    server::serve(server::router(state), listener)
        .await
        .context("Server error")
}

async fn run_images_to_pdf(args: ImagesToPdfArgs, quiet: bool) -> Result<()> {
    let mut sources = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        sources.push(SourceRef::upload(display_name(path), data));
    }

    let mut request = ImagesToPdfRequest::new(sources)
        .page_size(args.page_size)
        .orientation(args.orientation)
        .margin(args.margin)
        .quality(args.quality);
    if let Some(ref output) = args.output {
        request = request.output_name(display_name(output));
    }
    if let Some(cb) = progress(quiet || args.no_progress) {
        request = request.progress_callback(cb);
    }

    // Local runs never reference registry keys.
    let registry = ArtifactRegistry::new(1, Duration::from_secs(1));
    let output = images_to_pdf(&registry, request)
        .await
        .context("Conversion failed")?;
    write_output(output, args.output).await
}

async fn run_pdf_to_images(args: PdfToImagesArgs, quiet: bool) -> Result<()> {
    let config = engine_config(&args.engine)
        .build()
        .context("Invalid configuration")?;
    let rasterizer = Rasterizer::new(Rasterizer::capability_for(&config), &config);

    let data = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let mut request =
        PdfToImagesRequest::new(SourceRef::upload(display_name(&args.input), data));
    if let Some(ref output) = args.output {
        request = request.output_name(display_name(output));
    }
    if let Some(cb) = progress(quiet || args.no_progress) {
        request = request.progress_callback(cb);
    }

    let registry = ArtifactRegistry::new(1, Duration::from_secs(1));
    let output = rasterizer
        .pdf_to_images(&registry, request)
        .await
        .context("Conversion failed")?;
    write_output(output, args.output).await
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn engine_config(engine: &EngineArgs) -> edgequake_docconv::ServiceConfigBuilder {
    let mut builder = ServiceConfig::builder()
        .rasterizer_program(engine.rasterizer.clone())
        .dpi(engine.dpi)
        .process_timeout(Duration::from_secs(engine.process_timeout));
    if let Some(ref root) = engine.scratch_root {
        builder = builder.scratch_root(root.clone());
    }
    builder
}

fn progress(disabled: bool) -> Option<ProgressCallback> {
    if disabled {
        None
    } else {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Drain `output` into `path` (or its suggested filename), removing the
/// partial file if the stream fails.
async fn write_output(output: ConvertedOutput, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(&output.filename));
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    match stream::drain_into(output.body, &mut file).await {
        Ok(bytes) => {
            info!("Wrote {} ({} bytes)", path.display(), bytes);
            Ok(())
        }
        Err(e) => {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove partial output {}: {}", path.display(), rm);
            }
            Err(e).with_context(|| format!("Failed to write {}", path.display()))
        }
    }
}
