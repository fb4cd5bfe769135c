mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagelens")]
#[command(about = "Visual-regression validation of live pages against design rasters", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a live page against a reference design raster
    Validate {
        /// URL of the page to validate
        #[arg(short, long)]
        url: String,

        /// Reference image: an http(s) URL or a local file path
        #[arg(short, long)]
        reference: String,

        /// Path to the resolved design target (JSON)
        #[arg(short, long)]
        target: String,

        /// Validation mode: visual|layout|elements|assets|full
        #[arg(short, long, default_value = "visual")]
        mode: String,

        /// Explicit viewport "WIDTHxHEIGHT" (derived from the target's
        /// bounds when omitted)
        #[arg(long)]
        viewport: Option<String>,

        /// Path to a JSON config file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Chrome remote-debugging port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Capture a screenshot of a live page
    Capture {
        /// URL of the page to capture
        #[arg(short, long)]
        url: String,

        /// Viewport width in pixels
        #[arg(long, default_value_t = 1280)]
        width: u32,

        /// Viewport height in pixels
        #[arg(long, default_value_t = 720)]
        height: u32,

        /// Optional clip rectangle "x,y,width,height"
        #[arg(long)]
        clip: Option<String>,

        /// Chrome remote-debugging port
        #[arg(short, long, default_value_t = pagelens_core::config::DEFAULT_DEBUG_PORT)]
        port: u16,

        /// Output PNG path
        #[arg(short, long)]
        output: String,
    },

    /// Compare two image files pixel-by-pixel
    Compare {
        /// Expected (reference) image path
        expected: String,

        /// Actual (rendered) image path
        actual: String,

        /// Per-pixel color-distance threshold
        #[arg(short, long, default_value_t = pagelens_core::config::DEFAULT_PIXEL_THRESHOLD)]
        threshold: f64,

        /// Count anti-aliased pixels as mismatches
        #[arg(long)]
        include_aa: bool,

        /// Write the visual diff PNG to this path
        #[arg(short, long)]
        diff: Option<String>,
    },

    /// Plan implementation sections for a design target's children
    Sections {
        /// Path to the resolved design target (JSON)
        #[arg(short, long)]
        target: String,
    },

    /// Run environment diagnostics
    Doctor {
        /// Chrome remote-debugging port to probe
        #[arg(short, long, default_value_t = pagelens_core::config::DEFAULT_DEBUG_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Validate {
            url,
            reference,
            target,
            mode,
            viewport,
            config,
            port,
            output,
        } => {
            commands::validate::run(&url, &reference, &target, &mode, viewport, config, port, output)
                .await
        }
        Commands::Capture {
            url,
            width,
            height,
            clip,
            port,
            output,
        } => commands::capture::run(&url, width, height, clip, port, &output).await,
        Commands::Compare {
            expected,
            actual,
            threshold,
            include_aa,
            diff,
        } => commands::compare::run(&expected, &actual, threshold, include_aa, diff).await,
        Commands::Sections { target } => commands::sections::run(&target),
        Commands::Doctor { port } => commands::doctor::run(port).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(2);
        }
    }
}
