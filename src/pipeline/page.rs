//! Processing of individual pages.

use std::sync::Arc;

use image::DynamicImage;

use crate::{
    async_utils::blocking::spawn_blocking_propagating_panics,
    engines::{PageRenderer, TextRecognizer, enhance::ImageEnhancer},
    errors::ConvertError,
    prelude::*,
};

use super::ConvertOptions;

/// Everything needed to process one page, independent of any other page.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PageTask {
    /// The document containing the page.
    pub path: PathBuf,
    /// 1-based page number.
    pub page_number: usize,
    /// Rendering resolution.
    pub dpi: u32,
    /// Should we enhance the page image before OCR?
    pub enhance: bool,
    /// OCR language(s).
    pub lang: String,
    /// Extra OCR engine arguments.
    pub engine_config: String,
}

impl PageTask {
    /// Describe page `page_number` of `path`.
    pub fn new(path: &Path, page_number: usize, opts: &ConvertOptions) -> Self {
        Self {
            path: path.to_owned(),
            page_number,
            dpi: opts.dpi,
            enhance: opts.enhance,
            lang: opts.lang.clone(),
            engine_config: opts.engine_config.clone(),
        }
    }
}

/// The recognized text of one page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number.
    pub page_number: usize,
    /// Text exactly as returned by the recognizer.
    pub text: String,
}

/// Renders, enhances and recognizes pages.
#[derive(Clone)]
pub struct PageProcessor {
    renderer: Arc<dyn PageRenderer>,
    recognizer: Arc<dyn TextRecognizer>,
    enhancer: ImageEnhancer,
}

impl PageProcessor {
    /// Create a new page processor using the default enhancer settings.
    pub fn new(renderer: Arc<dyn PageRenderer>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            renderer,
            recognizer,
            enhancer: ImageEnhancer::default(),
        }
    }

    /// Our renderer.
    pub fn renderer(&self) -> &dyn PageRenderer {
        self.renderer.as_ref()
    }

    /// Our recognizer.
    pub fn recognizer(&self) -> &dyn TextRecognizer {
        self.recognizer.as_ref()
    }

    /// Render and recognize a single page.
    #[instrument(level = "debug", skip_all, fields(path = %task.path.display(), page = task.page_number))]
    pub async fn process(&self, task: PageTask) -> Result<PageText> {
        let page_number = task.page_number;
        let images = self
            .renderer
            .render(&task.path, task.dpi, page_number, page_number)
            .await
            .map_err(|err| ConvertError::upstream_page(&task.path, page_number, err))?;
        let image = match <[DynamicImage; 1]>::try_from(images) {
            Ok([image]) => image,
            Err(images) => {
                let err = anyhow!("renderer returned {} images for 1 page", images.len());
                return Err(ConvertError::upstream_page(&task.path, page_number, err).into());
            }
        };
        self.recognize_image(&task, image).await
    }

    /// Render pages `first_page..=last_page` with a single renderer call, then
    /// recognize them one at a time, in order.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), first_page, last_page))]
    pub async fn process_range(
        &self,
        path: &Path,
        first_page: usize,
        last_page: usize,
        opts: &ConvertOptions,
    ) -> Result<Vec<PageText>> {
        let images = self
            .renderer
            .render(path, opts.dpi, first_page, last_page)
            .await
            .map_err(|err| ConvertError::upstream_pages(path, first_page, last_page, err))?;
        let expected = last_page + 1 - first_page;
        if images.len() != expected {
            let err = anyhow!(
                "renderer returned {} images for {} pages",
                images.len(),
                expected
            );
            return Err(ConvertError::upstream_pages(path, first_page, last_page, err).into());
        }

        let mut pages = Vec::with_capacity(expected);
        for (page_number, image) in (first_page..=last_page).zip(images) {
            let task = PageTask::new(path, page_number, opts);
            pages.push(self.recognize_image(&task, image).await?);
        }
        Ok(pages)
    }

    /// Optionally enhance an already-rendered page, then recognize it.
    async fn recognize_image(&self, task: &PageTask, image: DynamicImage) -> Result<PageText> {
        let image = if task.enhance {
            let enhancer = self.enhancer;
            spawn_blocking_propagating_panics(move || enhancer.enhance(&image)).await?
        } else {
            image
        };
        let text = self
            .recognizer
            .recognize(image, &task.lang, &task.engine_config)
            .await
            .map_err(|err| ConvertError::upstream_page(&task.path, task.page_number, err))?;
        trace!(page = task.page_number, chars = text.len(), "Recognized page");
        Ok(PageText {
            page_number: task.page_number,
            text,
        })
    }
}
