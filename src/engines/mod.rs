//! Interfaces to the external tools that do the heavy lifting.
//!
//! The pipeline only ever talks to a [`PageRenderer`] and a
//! [`TextRecognizer`]. Both are treated as slow, blocking-ish operations that
//! may fail, and both must be safe to call from many page tasks at once.

use image::DynamicImage;

use crate::prelude::*;

pub mod enhance;
pub mod poppler;
pub mod tesseract;
#[cfg(test)]
pub mod testing;

/// Turns document pages into raster images.
#[async_trait]
pub trait PageRenderer: Send + Sync + 'static {
    /// Make sure the renderer can actually run.
    async fn check_available(&self) -> Result<()>;

    /// Count the pages in a document. Returning 0 means "unknown".
    async fn page_count(&self, path: &Path) -> Result<usize>;

    /// Render the 1-based, inclusive page range `first_page..=last_page`,
    /// returning one image per page in page order.
    async fn render(
        &self,
        path: &Path,
        dpi: u32,
        first_page: usize,
        last_page: usize,
    ) -> Result<Vec<DynamicImage>>;
}

/// Extracts text from a single raster image.
#[async_trait]
pub trait TextRecognizer: Send + Sync + 'static {
    /// Make sure the recognizer can actually run.
    async fn check_available(&self) -> Result<()>;

    /// Recognize the text in `image` using the languages in `lang` (for
    /// example `eng+deu`) and the engine arguments in `config`.
    async fn recognize(&self, image: DynamicImage, lang: &str, config: &str)
    -> Result<String>;
}
