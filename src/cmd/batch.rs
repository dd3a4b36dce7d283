//! The `batch` subcommand.

use std::process::ExitCode;

use clap::Args;

use crate::{
    batch::{BatchOptions, batch_convert},
    prelude::*,
    ui::Ui,
};

use super::EngineOpts;

/// Options for the `batch` subcommand.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// Directory containing the PDFs to convert.
    pub input_dir: PathBuf,

    /// Directory to write text files to. Defaults to `<INPUT_DIR>_converted`.
    #[clap(short = 'o', long = "output")]
    pub output_dir: Option<PathBuf>,

    /// Write a JSON summary of the batch to this path.
    #[clap(long)]
    pub summary: Option<PathBuf>,

    #[clap(flatten)]
    pub batch: BatchOptions,

    #[clap(flatten)]
    pub engine: EngineOpts,
}

/// The `batch` subcommand. Exits with status 2 if no document was converted.
#[instrument(level = "debug", skip_all, fields(input_dir = %opts.input_dir.display()))]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<ExitCode> {
    let output_dir = opts
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_dir(&opts.input_dir));
    let pipeline = opts.engine.build_pipeline(ui.clone()).await?;
    let summary = batch_convert(pipeline, &opts.input_dir, &output_dir, &opts.batch).await?;

    if let Some(summary_path) = &opts.summary {
        let json = serde_json::to_string_pretty(&summary)
            .context("failed to serialize batch summary")?;
        tokio::fs::write(summary_path, json)
            .await
            .with_context(|| format!("failed to write {:?}", summary_path.display()))?;
    }

    ui.display_message(
        "📊",
        &format!(
            "Converted {} of {} documents into {} ({} failed)",
            summary.processed,
            summary.total,
            output_dir.display(),
            summary.failed.len()
        ),
    );
    if summary.processed == 0 {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// `some/dir` becomes `some/dir_converted`.
fn default_output_dir(input_dir: &Path) -> PathBuf {
    let mut output_dir = input_dir
        .components()
        .collect::<PathBuf>()
        .into_os_string();
    output_dir.push("_converted");
    PathBuf::from(output_dir)
}
