//! Command-line entry points.

use std::sync::Arc;

use clap::Args;

use crate::{
    engines::{poppler::PopplerRenderer, tesseract::TesseractRecognizer},
    pipeline::Pipeline,
    prelude::*,
    ui::Ui,
};

pub mod batch;
pub mod convert;

/// Where to find our external tools.
#[derive(Args, Clone, Debug)]
pub struct EngineOpts {
    /// Path to the `tesseract` executable. Defaults to searching `PATH`.
    #[clap(long, env = "PDF2TEXT_TESSERACT")]
    pub tesseract_path: Option<PathBuf>,

    /// Directory containing Poppler's `pdfinfo` and `pdftocairo`. Defaults to
    /// searching `PATH`.
    #[clap(long, env = "PDF2TEXT_POPPLER")]
    pub poppler_path: Option<PathBuf>,
}

impl EngineOpts {
    /// Build a pipeline using Poppler and Tesseract, and make sure both tools
    /// actually run.
    pub async fn build_pipeline(&self, ui: Ui) -> Result<Pipeline> {
        let renderer = Arc::new(PopplerRenderer::new(self.poppler_path.clone()));
        let recognizer = Arc::new(TesseractRecognizer::new(self.tesseract_path.clone()));
        let pipeline = Pipeline::new(renderer, recognizer, ui);
        pipeline.check_dependencies().await?;
        Ok(pipeline)
    }
}
