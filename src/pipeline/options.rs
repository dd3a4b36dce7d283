//! Per-document conversion settings.

use clap::{Args, ValueEnum};

use crate::{prelude::*, work_queue::WorkerKind};

/// How pages of a single document are scheduled.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One page (or chunk of pages) at a time, in page order.
    #[default]
    Sequential,
    /// Concurrent pages, with the work done by child processes.
    Processes,
    /// Concurrent pages, each on its own runtime task.
    Threads,
}

impl ExecutionMode {
    /// The work queue flavour for this mode, or `None` if pages should be
    /// processed in order.
    pub fn worker_kind(self) -> Option<WorkerKind> {
        match self {
            ExecutionMode::Sequential => None,
            ExecutionMode::Processes => Some(WorkerKind::Process),
            ExecutionMode::Threads => Some(WorkerKind::Thread),
        }
    }
}

/// Options controlling how a document is rendered and recognized.
#[derive(Args, Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConvertOptions {
    /// Resolution used when rendering pages.
    #[clap(long, default_value = "200", value_parser = clap::value_parser!(u32).range(1..))]
    pub dpi: u32,

    /// Tesseract language(s), like `eng` or `eng+deu`.
    #[clap(long, default_value = "eng")]
    pub lang: String,

    /// Extra arguments passed to tesseract. The default assumes a single
    /// uniform block of text.
    #[clap(
        long = "tesseract-config",
        default_value = "--psm 6",
        allow_hyphen_values = true
    )]
    pub engine_config: String,

    /// Clean up page images before OCR (grayscale, contrast, sharpen,
    /// denoise).
    #[clap(long)]
    pub enhance: bool,

    /// Render this many pages per renderer call. Only used by the
    /// `sequential` mode.
    #[clap(long, default_value = "1")]
    pub chunk_size: usize,

    /// Max number of pages to process at a time. Defaults to the number of
    /// CPUs.
    #[clap(id = "jobs", short = 'j', long = "jobs")]
    pub workers: Option<usize>,

    /// How to schedule the pages of each document.
    #[clap(long, value_enum, default_value_t = ExecutionMode::Sequential)]
    pub mode: ExecutionMode,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            dpi: 200,
            lang: "eng".to_owned(),
            engine_config: "--psm 6".to_owned(),
            enhance: false,
            chunk_size: 1,
            workers: None,
            mode: ExecutionMode::Sequential,
        }
    }
}

impl ConvertOptions {
    /// Pages per renderer call, never less than 1.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// How many pages of a `page_count`-page document to run at once.
    pub fn worker_count(&self, page_count: usize) -> usize {
        self.workers
            .unwrap_or_else(num_cpus::get)
            .min(page_count)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_clamped() {
        let opts = ConvertOptions {
            chunk_size: 0,
            ..ConvertOptions::default()
        };
        assert_eq!(opts.chunk_size(), 1);
    }

    #[test]
    fn worker_count_is_capped_by_page_count() {
        let opts = ConvertOptions {
            workers: Some(8),
            ..ConvertOptions::default()
        };
        assert_eq!(opts.worker_count(3), 3);
        assert_eq!(opts.worker_count(20), 8);
        assert_eq!(opts.worker_count(0), 1);

        let opts = ConvertOptions {
            workers: Some(0),
            ..ConvertOptions::default()
        };
        assert_eq!(opts.worker_count(5), 1);
    }

    #[test]
    fn modes_map_to_worker_kinds() {
        assert_eq!(ExecutionMode::Sequential.worker_kind(), None);
        assert_eq!(
            ExecutionMode::Processes.worker_kind(),
            Some(WorkerKind::Process)
        );
        assert_eq!(ExecutionMode::Threads.worker_kind(), Some(WorkerKind::Thread));
    }
}
