//! Turning one document into text.
//!
//! A [`Pipeline`] counts the pages of a document, splits it into page tasks,
//! runs them using one of several strategies, and joins the recognized text
//! back together in page order.

use std::sync::Arc;

use futures::{FutureExt as _, StreamExt as _, TryStreamExt as _, future, stream};

use crate::{
    async_utils::BoxedStream,
    engines::{PageRenderer, TextRecognizer},
    errors::ConvertError,
    prelude::*,
    ui::{ProgressConfig, Ui},
    work_queue::{WorkFn, WorkerKind, run_all},
};

mod options;
mod page;

pub use self::{
    options::ConvertOptions,
    page::{PageProcessor, PageTask, PageText},
};

/// Converts documents to text.
#[derive(Clone)]
pub struct Pipeline {
    processor: PageProcessor,
    ui: Ui,
}

impl Pipeline {
    /// Create a new pipeline.
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        recognizer: Arc<dyn TextRecognizer>,
        ui: Ui,
    ) -> Self {
        Self {
            processor: PageProcessor::new(renderer, recognizer),
            ui,
        }
    }

    /// Our UI.
    pub fn ui(&self) -> &Ui {
        &self.ui
    }

    /// Make sure our renderer and recognizer can run, before we try to
    /// convert anything.
    pub async fn check_dependencies(&self) -> Result<()> {
        self.processor.renderer().check_available().await?;
        self.processor.recognizer().check_available().await?;
        Ok(())
    }

    /// Convert a document using the strategy selected by `opts.mode`.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), mode = ?opts.mode))]
    pub async fn convert(&self, path: &Path, opts: &ConvertOptions) -> Result<String> {
        match opts.mode.worker_kind() {
            None => self.extract(path, opts).await,
            Some(kind) => self.extract_concurrent(path, opts, kind).await,
        }
    }

    /// Lazily recognize the pages of `path`, in page order.
    ///
    /// Nothing happens until the stream is polled. Counting failures are
    /// reported as the stream's first (and only) item. If pages arrive out of
    /// order, or the stream ends before the last page, it yields an error.
    pub fn stream(&self, path: &Path, opts: &ConvertOptions) -> BoxedStream<Result<PageText>> {
        let pipeline = self.clone();
        let path = path.to_owned();
        let opts = opts.clone();
        stream::once(async move {
            let page_count = pipeline.count_pages(&path).await?;
            let pb = pipeline.ui.new_progress_bar(&PAGE_PROGRESS, page_count as u64);
            let pages = pb.wrap_stream(pipeline.pages_stream(path.clone(), page_count, opts));
            Ok::<_, anyhow::Error>(checked_page_order(path, page_count, pages.boxed()))
        })
        .try_flatten()
        .boxed()
    }

    /// Recognize the pages of `path` one page (or chunk) at a time.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), chunk_size = opts.chunk_size()))]
    pub async fn extract(&self, path: &Path, opts: &ConvertOptions) -> Result<String> {
        let pages = self.stream(path, opts).try_collect::<Vec<_>>().await?;
        debug!(page_count = pages.len(), "Extracted all pages");
        Ok(format_document(&pages))
    }

    /// Recognize the pages of `path` concurrently, using a work queue of
    /// `kind`.
    ///
    /// Every page is processed even if some fail, and the queue is shut down
    /// before we return. Any page failure fails the whole document.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), kind = ?kind))]
    pub async fn extract_concurrent(
        &self,
        path: &Path,
        opts: &ConvertOptions,
        kind: WorkerKind,
    ) -> Result<String> {
        let page_count = self.count_pages(path).await?;
        let workers = opts.worker_count(page_count);
        debug!(page_count, workers, "Dispatching pages");

        let tasks = (1..=page_count)
            .map(|page_number| PageTask::new(path, page_number, opts))
            .collect::<Vec<_>>();
        let pb = self.ui.new_progress_bar(&PAGE_PROGRESS, page_count as u64);
        let processor = self.processor.clone();
        let work_pb = pb.clone();
        let work_fn: WorkFn<PageTask, PageText> = Arc::new(move |task: PageTask| {
            let processor = processor.clone();
            let pb = work_pb.clone();
            async move {
                let page = processor.process(task).await?;
                pb.inc(1);
                Ok::<_, anyhow::Error>(page)
            }
            .boxed()
        });

        let mut pages = run_all(kind, workers, tasks, work_fn).await?;
        pages.sort_by_key(|page| page.page_number);
        ensure_complete(path, &pages, page_count)?;
        debug!(page_count, "Collected all pages");
        Ok(format_document(&pages))
    }

    /// Count the pages in `path`, failing if there is nothing we can work on.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn count_pages(&self, path: &Path) -> Result<usize> {
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ConvertError::NotFound(path.to_owned()).into());
        }

        match self.processor.renderer().page_count(path).await {
            Ok(0) => Err(ConvertError::Unprocessable {
                path: path.to_owned(),
                reason: "document has no pages".to_owned(),
            }
            .into()),
            Ok(page_count) => {
                debug!(page_count, "Counted pages");
                Ok(page_count)
            }
            Err(err) => Err(ConvertError::Unprocessable {
                path: path.to_owned(),
                reason: format!("{err:#}"),
            }
            .into()),
        }
    }

    /// Stream the recognized pages of a document we have already counted.
    fn pages_stream(
        &self,
        path: PathBuf,
        page_count: usize,
        opts: ConvertOptions,
    ) -> BoxedStream<Result<PageText>> {
        let processor = self.processor.clone();
        let chunk_size = opts.chunk_size();
        if chunk_size == 1 {
            stream::iter(1..=page_count)
                .then(move |page_number| {
                    let processor = processor.clone();
                    let task = PageTask::new(&path, page_number, &opts);
                    async move { processor.process(task).await }
                })
                .boxed()
        } else {
            stream::iter(chunk_ranges(page_count, chunk_size))
                .then(move |(first_page, last_page)| {
                    let processor = processor.clone();
                    let path = path.clone();
                    let opts = opts.clone();
                    async move {
                        processor
                            .process_range(&path, first_page, last_page, &opts)
                            .await
                    }
                })
                .map_ok(|pages| stream::iter(pages.into_iter().map(Ok::<_, anyhow::Error>)))
                .try_flatten()
                .boxed()
        }
    }
}

/// Progress bar settings for pages of a document.
const PAGE_PROGRESS: ProgressConfig<'static> = ProgressConfig {
    emoji: "📃",
    msg: "Recognizing pages",
    done_msg: "Recognized pages",
};

/// Split `1..=page_count` into inclusive ranges of at most `chunk_size` pages.
fn chunk_ranges(page_count: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    let chunk_size = chunk_size.max(1);
    (1..=page_count)
        .step_by(chunk_size)
        .map(|first_page| {
            let last_page = first_page.saturating_add(chunk_size - 1).min(page_count);
            (first_page, last_page)
        })
        .collect()
}

/// Pass `pages` through, failing if they are not exactly pages
/// `1..=page_count` in order.
fn checked_page_order(
    path: PathBuf,
    page_count: usize,
    pages: BoxedStream<Result<PageText>>,
) -> BoxedStream<Result<PageText>> {
    pages
        .map(Some)
        .chain(stream::once(async { None }))
        .enumerate()
        .filter_map(move |(idx, item)| {
            let checked = match item {
                Some(Ok(page)) if idx < page_count && page.page_number == idx + 1 => {
                    Some(Ok(page))
                }
                Some(Ok(page)) => Some(Err(anyhow!(
                    "expected page {} of {:?}, but got page {}",
                    idx + 1,
                    path.display(),
                    page.page_number
                ))),
                Some(Err(err)) => Some(Err(err)),
                None if idx == page_count => None,
                None => Some(Err(anyhow!(
                    "expected {} pages of {:?}, but got {}",
                    page_count,
                    path.display(),
                    idx
                ))),
            };
            future::ready(checked)
        })
        .boxed()
}

/// Make sure we have exactly one result for each page, in order.
fn ensure_complete(path: &Path, pages: &[PageText], page_count: usize) -> Result<()> {
    let in_order = pages
        .iter()
        .enumerate()
        .all(|(idx, page)| page.page_number == idx + 1);
    if pages.len() == page_count && in_order {
        Ok(())
    } else {
        Err(anyhow!(
            "expected {} pages of {:?}, but got results for {:?}",
            page_count,
            path.display(),
            pages.iter().map(|page| page.page_number).collect::<Vec<_>>()
        ))
    }
}

/// Join pages into a single document, with a header before each page.
fn format_document(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| format!("--- Page {} ---\n{}\n", page.page_number, page.text))
        .collect::<Vec<_>>()
        .join("\n")
}
