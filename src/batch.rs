//! Converting many documents, one failure at a time.

use std::{
    path::{Component, absolute},
    sync::Arc,
};

use clap::Args;
use futures::{FutureExt as _, StreamExt as _};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;

use crate::{
    errors::{ConvertError, is_expected_failure},
    pipeline::{ConvertOptions, Pipeline},
    prelude::*,
    ui::ProgressConfig,
    work_queue::{WorkFn, run_all},
};

/// Maps an input document to the path of its text output.
pub type NamingRule = Arc<dyn Fn(&Path) -> Result<PathBuf> + Send + Sync + 'static>;

/// Options for converting a directory of documents.
#[derive(Args, Clone, Debug)]
pub struct BatchOptions {
    /// How to convert each document.
    #[clap(flatten)]
    pub convert: ConvertOptions,

    /// Convert several documents at once.
    #[clap(long)]
    pub parallel: bool,

    /// Max number of documents to convert at once with `--parallel`.
    /// Defaults to the number of CPUs.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Only convert files whose names end with this.
    #[clap(long = "ext", default_value = ".pdf")]
    pub extension: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            convert: ConvertOptions::default(),
            parallel: false,
            workers: None,
            extension: ".pdf".to_owned(),
        }
    }
}

/// A document we skipped.
#[derive(Clone, Debug, Serialize)]
pub struct DocumentFailure {
    /// The input document.
    pub path: PathBuf,
    /// What went wrong.
    pub error: String,
}

/// What happened during a batch.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchSummary {
    /// Documents converted successfully.
    pub processed: usize,
    /// Documents we skipped.
    pub failed: Vec<DocumentFailure>,
    /// Documents we were asked to convert.
    pub total: usize,
}

/// Converts documents into text files below an output directory.
#[derive(Clone)]
pub struct BatchRunner {
    pipeline: Pipeline,
    output_root: PathBuf,
}

impl BatchRunner {
    /// Create a runner which writes everything below `output_root`.
    pub fn new(pipeline: Pipeline, output_root: PathBuf) -> Self {
        Self {
            pipeline,
            output_root,
        }
    }

    /// Convert `documents`, in order (or concurrently with `opts.parallel`).
    ///
    /// Expected failures are logged and recorded in the summary, and we move
    /// on to the next document. Anything else aborts the batch.
    #[instrument(level = "debug", skip_all, fields(count = documents.len(), parallel = opts.parallel))]
    pub async fn run(
        &self,
        documents: Vec<PathBuf>,
        naming: NamingRule,
        opts: &BatchOptions,
    ) -> Result<BatchSummary> {
        let total = documents.len();
        let pb = self.pipeline.ui().new_progress_bar(
            &ProgressConfig {
                emoji: "📄",
                msg: "Converting documents",
                done_msg: "Converted documents",
            },
            total as u64,
        );

        let failures = if opts.parallel {
            let workers = opts.workers.unwrap_or_else(num_cpus::get).min(total);
            let kind = opts.convert.mode.worker_kind().unwrap_or_default();
            let runner = self.clone();
            let convert_opts = opts.convert.clone();
            let work_pb = pb.clone();
            let work_fn: WorkFn<PathBuf, Option<DocumentFailure>> =
                Arc::new(move |document: PathBuf| {
                    let runner = runner.clone();
                    let naming = naming.clone();
                    let opts = convert_opts.clone();
                    let pb = work_pb.clone();
                    async move {
                        let failure = runner.convert_document(&document, &naming, &opts).await?;
                        pb.inc(1);
                        Ok::<_, anyhow::Error>(failure)
                    }
                    .boxed()
                });
            run_all(kind, workers, documents, work_fn).await?
        } else {
            let mut failures = Vec::with_capacity(total);
            for document in documents {
                failures.push(
                    self.convert_document(&document, &naming, &opts.convert)
                        .await?,
                );
                pb.inc(1);
            }
            failures
        };

        let failed = failures.into_iter().flatten().collect::<Vec<_>>();
        Ok(BatchSummary {
            processed: total - failed.len(),
            failed,
            total,
        })
    }

    /// Convert a single document, returning `Some` if it failed in a way that
    /// should not stop the batch.
    async fn convert_document(
        &self,
        document: &Path,
        naming: &NamingRule,
        opts: &ConvertOptions,
    ) -> Result<Option<DocumentFailure>> {
        match self.try_convert_document(document, naming, opts).await {
            Ok(destination) => {
                info!(
                    document = %document.display(),
                    destination = %destination.display(),
                    "Converted document"
                );
                Ok(None)
            }
            Err(err) if is_expected_failure(&err) => {
                error!(document = %document.display(), "{}", err);
                debug!(document = %document.display(), "{:?}", err);
                Ok(Some(DocumentFailure {
                    path: document.to_owned(),
                    error: format!("{err:#}"),
                }))
            }
            Err(err) => Err(err),
        }
    }

    async fn try_convert_document(
        &self,
        document: &Path,
        naming: &NamingRule,
        opts: &ConvertOptions,
    ) -> Result<PathBuf> {
        let destination = naming(document)?;
        ensure_within_root(&destination, &self.output_root)?;
        let text = self.pipeline.convert(document, opts).await?;
        fs::write(&destination, text)
            .await
            .with_context(|| format!("failed to write {:?}", destination.display()))?;
        Ok(destination)
    }
}

/// Convert every matching document in `input_dir`, writing `<stem>.txt` files
/// into `output_root`.
#[instrument(level = "debug", skip_all, fields(input_dir = %input_dir.display(), output_root = %output_root.display()))]
pub async fn batch_convert(
    pipeline: Pipeline,
    input_dir: &Path,
    output_root: &Path,
    opts: &BatchOptions,
) -> Result<BatchSummary> {
    fs::create_dir_all(output_root)
        .await
        .with_context(|| format!("failed to create {:?}", output_root.display()))?;
    let documents = list_documents(input_dir, &opts.extension).await?;
    debug!(count = documents.len(), "Found documents");
    BatchRunner::new(pipeline, output_root.to_owned())
        .run(documents, default_naming(output_root), opts)
        .await
}

/// The usual naming rule: `<root>/<stem>.txt`.
///
/// Paths without a file name, like `/` or `..`, can't be named.
pub fn default_naming(output_root: &Path) -> NamingRule {
    let output_root = output_root.to_owned();
    Arc::new(move |document: &Path| {
        let Some(stem) = document.file_stem() else {
            return Err(ConvertError::NoFileName(document.to_owned()).into());
        };
        let mut file_name = stem.to_owned();
        file_name.push(".txt");
        Ok(output_root.join(file_name))
    })
}

/// List the regular files in `dir` whose names end with `extension`, sorted
/// by path.
pub async fn list_documents(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let is_dir = fs::metadata(dir)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(ConvertError::NotFound(dir.to_owned()).into());
    }

    let read_dir = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {:?}", dir.display()))?;
    let mut entries = ReadDirStream::new(read_dir);
    let mut documents = vec![];
    while let Some(entry) = entries.next().await {
        let path = entry
            .with_context(|| format!("failed to read entry in {:?}", dir.display()))?
            .path();
        let name_matches = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(extension));
        // `fs::metadata` follows symlinks.
        if name_matches && fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

/// Fail unless `destination` is strictly inside `root`.
///
/// Both paths are made absolute and `.` and `..` are resolved lexically.
/// Symlinks are not followed.
pub fn ensure_within_root(destination: &Path, root: &Path) -> Result<()> {
    let normalized_destination = normalize_lexically(&absolute(destination)?);
    let normalized_root = normalize_lexically(&absolute(root)?);
    if normalized_destination != normalized_root
        && normalized_destination.starts_with(&normalized_root)
    {
        Ok(())
    } else {
        Err(ConvertError::Validation {
            destination: destination.to_owned(),
            root: root.to_owned(),
        }
        .into())
    }
}

/// Remove `.` and resolve `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
