use std::{process::ExitCode, str::FromStr};

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{
    prelude::*,
    ui::{Ui, UiStyle},
};

mod async_utils;
mod batch;
mod cmd;
mod engines;
mod errors;
mod pipeline;
mod prelude;
mod ui;
mod work_queue;

/// Convert scanned PDFs to searchable text using Poppler and Tesseract.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - PDF2TEXT_TESSERACT (optional): Path to the `tesseract` executable.
  - PDF2TEXT_POPPLER (optional): Directory containing `pdfinfo` and `pdftocairo`.
  - RUST_LOG (optional): Override the log filter, like `pdf2text=debug`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// Show debug logs.
    #[clap(short = 'v', long, global = true)]
    verbose: bool,

    /// How to display progress.
    #[clap(long, value_enum, global = true, default_value_t = UiStyle::Fancy)]
    ui: UiStyle,

    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Convert a single PDF to a text file.
    Convert(cmd::convert::ConvertOpts),
    /// Convert every PDF in a directory.
    Batch(cmd::batch::BatchOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from a `.env` file, if it exists. This needs
    // to happen before parsing, so that `env` defaults can see them.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    let ui = Ui::init(opts.ui);

    // Initialize tracing.
    let default_level = if opts.verbose { "debug" } else { "info" };
    let directive =
        Directive::from_str(default_level).expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = match ui.style() {
        UiStyle::Fancy => tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(ui.get_stderr_writer())
            .with_filter(env_filter)
            .boxed(),
        UiStyle::Plain => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(false)
            .with_target(false)
            .with_writer(ui.get_stderr_writer())
            .with_filter(env_filter)
            .boxed(),
    };

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui, opts).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui, opts: Opts) -> Result<ExitCode> {
    debug!("Parsed options: {:?}", opts);

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Convert(convert_opts) => {
            cmd::convert::cmd_convert(ui, convert_opts).await?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Batch(batch_opts) => cmd::batch::cmd_batch(ui, batch_opts).await,
    }
}
