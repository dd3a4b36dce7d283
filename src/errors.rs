//! Error kinds that callers need to tell apart.
//!
//! Most code in this crate returns [`anyhow::Result`]. When a failure belongs
//! to one of the kinds below, we wrap a [`ConvertError`] in the
//! [`anyhow::Error`], so that the batch layer can recover it with
//! [`anyhow::Error::downcast_ref`] and decide whether to skip the document or
//! abort the whole run.

use thiserror::Error;

use crate::prelude::*;

/// A boxed upstream error.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures with a well-defined meaning for the conversion pipeline.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The document or input directory does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// We could not determine how many pages the document has.
    #[error("could not determine page count for {}: {reason}", .path.display())]
    Unprocessable {
        /// The document we tried to count.
        path: PathBuf,
        /// Why counting failed.
        reason: String,
    },

    /// A computed output path would escape the output root.
    #[error(
        "refusing to write {} because it is outside of {}",
        .destination.display(),
        .root.display()
    )]
    Validation {
        /// The destination we computed.
        destination: PathBuf,
        /// The directory all outputs must stay inside.
        root: PathBuf,
    },

    /// A document path has no file name to build an output name from.
    #[error("cannot name the output for {}: it has no file name", .0.display())]
    NoFileName(PathBuf),

    /// The renderer or recognizer failed while processing pages.
    #[error("failed to process {pages} of {}", .path.display())]
    Upstream {
        /// The document being processed.
        path: PathBuf,
        /// A human-readable page or page range, like "page 3".
        pages: String,
        /// The underlying failure.
        #[source]
        source: BoxedError,
    },

    /// An external tool we rely on is not installed.
    #[error("{tool} is not available ({hint})")]
    DependencyMissing {
        /// The tool we looked for.
        tool: String,
        /// How to install it.
        hint: &'static str,
    },
}

impl ConvertError {
    /// Wrap a renderer or recognizer failure for a single page.
    pub fn upstream_page(path: &Path, page_number: usize, err: anyhow::Error) -> Self {
        Self::Upstream {
            path: path.to_owned(),
            pages: format!("page {page_number}"),
            source: err.into(),
        }
    }

    /// Wrap a renderer failure for a range of pages.
    pub fn upstream_pages(
        path: &Path,
        first_page: usize,
        last_page: usize,
        err: anyhow::Error,
    ) -> Self {
        Self::Upstream {
            path: path.to_owned(),
            pages: format!("pages {first_page}-{last_page}"),
            source: err.into(),
        }
    }

    /// Is this an operational failure that should only skip one document
    /// during a batch?
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::DependencyMissing { .. })
    }
}

/// Does `err` carry a [`ConvertError`] that a batch should survive?
pub fn is_expected_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ConvertError>()
        .is_some_and(ConvertError::is_expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_failures_survive_context() {
        let err = anyhow::Error::from(ConvertError::NotFound(PathBuf::from("a.pdf")))
            .context("while converting a.pdf");
        assert!(is_expected_failure(&err));
    }

    #[test]
    fn missing_dependencies_and_plain_errors_are_not_expected() {
        let missing = anyhow::Error::from(ConvertError::DependencyMissing {
            tool: "tesseract".to_owned(),
            hint: "install tesseract-ocr",
        });
        assert!(!is_expected_failure(&missing));
        assert!(!is_expected_failure(&anyhow!("disk full")));
    }

    #[test]
    fn unnameable_documents_are_expected() {
        let err = anyhow::Error::from(ConvertError::NoFileName(PathBuf::from("/")));
        assert!(is_expected_failure(&err));
        assert_eq!(err.to_string(), "cannot name the output for /: it has no file name");
    }

    #[test]
    fn upstream_keeps_source_message() {
        let err = ConvertError::upstream_page(Path::new("a.pdf"), 3, anyhow!("boom"));
        assert_eq!(err.to_string(), "failed to process page 3 of a.pdf");
        let source = std::error::Error::source(&err).expect("should have a source");
        assert_eq!(source.to_string(), "boom");
    }
}
