//! The `convert` subcommand.

use clap::Args;

use crate::{pipeline::ConvertOptions, prelude::*, ui::Ui};

use super::EngineOpts;

/// Options for the `convert` subcommand.
#[derive(Debug, Args)]
pub struct ConvertOpts {
    /// The PDF to convert.
    pub input_path: PathBuf,

    /// Where to write the text. Defaults to the input path with a `.txt`
    /// extension.
    #[clap(short = 'o', long = "output")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub convert: ConvertOptions,

    #[clap(flatten)]
    pub engine: EngineOpts,
}

/// The `convert` subcommand.
#[instrument(level = "debug", skip_all, fields(input_path = %opts.input_path.display()))]
pub async fn cmd_convert(ui: Ui, opts: &ConvertOpts) -> Result<()> {
    let pipeline = opts.engine.build_pipeline(ui.clone()).await?;
    let text = pipeline.convert(&opts.input_path, &opts.convert).await?;

    let output_path = opts
        .output_path
        .clone()
        .unwrap_or_else(|| opts.input_path.with_extension("txt"));
    tokio::fs::write(&output_path, text)
        .await
        .with_context(|| format!("failed to write {:?}", output_path.display()))?;
    ui.display_message("✅", &format!("Wrote {}", output_path.display()));
    Ok(())
}
