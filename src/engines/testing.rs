//! Fake engines for unit tests.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use image::DynamicImage;

use crate::prelude::*;

use super::{PageRenderer, TextRecognizer};

/// A renderer that draws page `n` as an `n`×1 image, so that the recognizer
/// can tell which page it was handed.
#[derive(Debug, Default)]
pub struct MockRenderer {
    /// Page count for any file not listed in `page_counts`.
    default_pages: usize,
    /// Page counts by file name.
    page_counts: HashMap<String, usize>,
    /// File names whose page count should fail.
    broken_files: Vec<String>,
    /// Fail when asked to render this page.
    fail_on_page: Option<usize>,
    /// Number of `page_count` calls.
    pub page_count_calls: AtomicUsize,
    /// Number of `render` calls.
    pub render_calls: AtomicUsize,
}

impl MockRenderer {
    /// Every document has `pages` pages.
    pub fn with_pages(pages: usize) -> Self {
        Self {
            default_pages: pages,
            ..Self::default()
        }
    }

    /// Give the file named `file_name` a different page count.
    pub fn with_document(mut self, file_name: &str, pages: usize) -> Self {
        self.page_counts.insert(file_name.to_owned(), pages);
        self
    }

    /// Make `page_count` fail for the file named `file_name`.
    pub fn with_broken_document(mut self, file_name: &str) -> Self {
        self.broken_files.push(file_name.to_owned());
        self
    }

    /// Make rendering fail on `page_number`.
    pub fn failing_on_page(mut self, page_number: usize) -> Self {
        self.fail_on_page = Some(page_number);
        self
    }

    /// Total number of calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.page_count_calls.load(Ordering::SeqCst) + self.render_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    async fn check_available(&self) -> Result<()> {
        Ok(())
    }

    async fn page_count(&self, path: &Path) -> Result<usize> {
        self.page_count_calls.fetch_add(1, Ordering::SeqCst);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.broken_files.contains(&file_name) {
            return Err(anyhow!("corrupt document"));
        }
        Ok(self
            .page_counts
            .get(&file_name)
            .copied()
            .unwrap_or(self.default_pages))
    }

    async fn render(
        &self,
        _path: &Path,
        _dpi: u32,
        first_page: usize,
        last_page: usize,
    ) -> Result<Vec<DynamicImage>> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        (first_page..=last_page)
            .map(|page_number| {
                if Some(page_number) == self.fail_on_page {
                    Err(anyhow!("cannot render page {}", page_number))
                } else {
                    Ok(DynamicImage::new_luma8(page_number as u32, 1))
                }
            })
            .collect()
    }
}

/// A recognizer that reports which page it saw, as `T<page>`.
#[derive(Debug, Default)]
pub struct MockRecognizer {
    /// Return this instead of `T<page>`.
    text: Option<String>,
    /// If set, sleep `(max - page)` milliseconds, so that later pages finish
    /// first.
    reverse_delay_from: Option<u64>,
    /// Fail when recognizing this page.
    fail_on_page: Option<usize>,
    /// Number of `recognize` calls.
    pub calls: AtomicUsize,
}

impl MockRecognizer {
    /// Always recognize `text`.
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Some(text.to_owned()),
            ..Self::default()
        }
    }

    /// Finish pages in reverse order, assuming no more than `max` pages.
    pub fn with_reverse_delay(mut self, max: u64) -> Self {
        self.reverse_delay_from = Some(max);
        self
    }

    /// Make recognition fail on `page_number`.
    pub fn failing_on_page(mut self, page_number: usize) -> Self {
        self.fail_on_page = Some(page_number);
        self
    }
}

#[async_trait]
impl TextRecognizer for MockRecognizer {
    async fn check_available(&self) -> Result<()> {
        Ok(())
    }

    async fn recognize(&self, image: DynamicImage, _lang: &str, _config: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let page_number = image.width() as usize;
        if let Some(max) = self.reverse_delay_from {
            let delay = max.saturating_sub(page_number as u64);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if Some(page_number) == self.fail_on_page {
            return Err(anyhow!("cannot recognize page {}", page_number));
        }
        Ok(self
            .text
            .clone()
            .unwrap_or_else(|| format!("T{page_number}")))
    }
}
