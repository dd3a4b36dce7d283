//! Page rendering using Poppler's `pdfinfo` and `pdftocairo` CLI tools.

use std::{collections::BTreeMap, fs, io, sync::LazyLock};

use image::{DynamicImage, ImageFormat};
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{blocking::spawn_blocking_propagating_panics, check_for_command_failure},
    errors::ConvertError,
    prelude::*,
};

use super::PageRenderer;

/// How to install Poppler, for error messages.
const POPPLER_HINT: &str = "install poppler-utils, or `brew install poppler` on macOS";

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Renders PDF pages to PNG images by shelling out to Poppler.
///
/// Every call runs its own child processes and uses its own temporary
/// directory, so a single renderer can serve any number of page tasks at once.
#[derive(Clone, Debug, Default)]
pub struct PopplerRenderer {
    /// Directory containing the Poppler binaries. If `None`, we search `PATH`.
    bin_dir: Option<PathBuf>,
}

impl PopplerRenderer {
    /// Create a new renderer.
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    /// Build a [`Command`] for one of the Poppler tools.
    fn command(&self, tool: &str) -> Command {
        match &self.bin_dir {
            Some(dir) => Command::new(dir.join(tool)),
            None => Command::new(tool),
        }
    }
}

#[async_trait]
impl PageRenderer for PopplerRenderer {
    async fn check_available(&self) -> Result<()> {
        for tool in ["pdfinfo", "pdftocairo"] {
            // Older Poppler releases exit with a non-zero status for `-v`, so
            // we only care whether the binary could be started.
            match self.command(tool).arg("-v").output().await {
                Ok(output) => {
                    let version = String::from_utf8_lossy(&output.stderr);
                    debug!(tool, version = %version.lines().next().unwrap_or(""), "Found Poppler tool");
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(ConvertError::DependencyMissing {
                        tool: tool.to_owned(),
                        hint: POPPLER_HINT,
                    }
                    .into());
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to run {}", tool));
                }
            }
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn page_count(&self, path: &Path) -> Result<usize> {
        // Sniffing the file type reads from disk.
        let sniffed = path.to_owned();
        spawn_blocking_propagating_panics(move || ensure_pdf(&sniffed)).await??;

        // Run pdfinfo to get the number of pages.
        let output = self
            .command("pdfinfo")
            .arg(path)
            .output()
            .await
            .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
        check_for_command_failure("pdfinfo", &output, None)?;

        let output = String::from_utf8(output.stdout)
            .context("pdfinfo output was not valid UTF-8")?;
        parse_pdfinfo_page_count(&output).with_context(|| {
            format!(
                "failed to parse page count for {:?} from pdfinfo output",
                path.display()
            )
        })
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi, first_page, last_page))]
    async fn render(
        &self,
        path: &Path,
        dpi: u32,
        first_page: usize,
        last_page: usize,
    ) -> Result<Vec<DynamicImage>> {
        if first_page == 0 || last_page < first_page {
            return Err(anyhow!("invalid page range {}-{}", first_page, last_page));
        }

        // Create a temporary directory to hold the PNG files. pdftocairo will
        // append page numbers to our output prefix.
        let tmpdir = tempfile::TempDir::with_prefix("pdf2text-pages")?;
        let out_prefix = tmpdir.path().join("page");

        let output = self
            .command("pdftocairo")
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(first_page.to_string())
            .arg("-l")
            .arg(last_page.to_string())
            .arg(path)
            .arg(&out_prefix)
            .output()
            .await
            .with_context(|| format!("failed to run pdftocairo on {:?}", path.display()))?;
        let is_error: &dyn Fn(&str) -> bool = &is_error_line;
        check_for_command_failure("pdftocairo", &output, Some(is_error))?;

        // Listing and decoding PNGs blocks, so do it on the blocking pool.
        // The temporary directory is deleted once decoding finishes.
        let path = path.to_owned();
        spawn_blocking_propagating_panics(move || {
            // pdftocairo pads page numbers to a fixed width, so sorting our
            // file names gives us page order.
            let page_paths = sorted_dir_entries(tmpdir.path())?;
            let expected = last_page - first_page + 1;
            if page_paths.len() != expected {
                return Err(anyhow!(
                    "pdftocairo produced {} images for pages {}-{} of {:?}",
                    page_paths.len(),
                    first_page,
                    last_page,
                    path.display()
                ));
            }
            let images = page_paths
                .iter()
                .map(|page_path| decode_png(page_path))
                .collect::<Result<Vec<_>>>();
            drop(tmpdir);
            images
        })
        .await?
    }
}

/// Fail unless `path` looks like a PDF file.
fn ensure_pdf(path: &Path) -> Result<()> {
    let mime_type = infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .map(|kind| kind.mime_type())
        .unwrap_or("unknown");
    if mime_type == "application/pdf" {
        Ok(())
    } else {
        Err(anyhow!(
            "{:?} is not a PDF file (detected type: {})",
            path.display(),
            mime_type
        ))
    }
}

/// Extract the `Pages:` property from `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }
    let page_count = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count
        .parse::<usize>()
        .with_context(|| format!("invalid page count {:?}", page_count))
}

/// List the files in `dir`, sorted by name.
fn sorted_dir_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = dir
        .read_dir()
        .with_context(|| format!("failed to read temporary directory {:?}", dir.display()))?
        .map(|entry| {
            let entry = entry.with_context(|| {
                format!(
                    "failed to read entry in temporary directory {:?}",
                    dir.display()
                )
            })?;
            Ok(entry.path())
        })
        .collect::<Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Read and decode a single PNG file.
fn decode_png(path: &Path) -> Result<DynamicImage> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read file {:?}", path.display()))?;
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .with_context(|| format!("failed to decode PNG {:?}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_PDF_PATH: &str = "tests/fixtures/two_pages.pdf";

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("error: something went wrong"));
        assert!(is_error_line("Syntax Error: something went wrong"));
        assert!(!is_error_line("Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }

    #[test]
    fn parses_page_count_from_pdfinfo() -> Result<()> {
        let output = "Title:          Scan\nProducer:       scanner\nPages:          37\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_page_count(output)?, 37);
        assert!(parse_pdfinfo_page_count("Title: nothing useful\n").is_err());
        assert!(parse_pdfinfo_page_count("Pages: many\n").is_err());
        Ok(())
    }

    #[test]
    fn ensure_pdf_checks_file_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pdf = dir.path().join("scan.pdf");
        fs::write(&pdf, b"%PDF-1.4\n%EOF\n")?;
        ensure_pdf(&pdf)?;

        let not_pdf = dir.path().join("notes.pdf");
        fs::write(&not_pdf, b"just some text")?;
        assert!(ensure_pdf(&not_pdf).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_invalid_ranges_before_running_anything() {
        let renderer = PopplerRenderer::new(Some(PathBuf::from("/nonexistent")));
        let result = renderer.render(Path::new(TEST_PDF_PATH), 200, 3, 2).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn page_count_sniffs_the_file_before_running_pdfinfo() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let not_pdf = dir.path().join("notes.pdf");
        fs::write(&not_pdf, b"just some text")?;
        let renderer = PopplerRenderer::new(Some(PathBuf::from("/nonexistent/poppler")));
        let err = renderer.page_count(&not_pdf).await.unwrap_err();
        assert!(format!("{err:#}").contains("is not a PDF file"), "{err:#}");

        let missing = dir.path().join("missing.pdf");
        let err = renderer.page_count(&missing).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to get MIME type"), "{err:#}");
        Ok(())
    }

    #[tokio::test]
    async fn missing_binaries_are_reported() {
        let renderer = PopplerRenderer::new(Some(PathBuf::from("/nonexistent/poppler")));
        let err = renderer.check_available().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::DependencyMissing { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn page_count_returns_correct_number_of_pages() -> Result<()> {
        let renderer = PopplerRenderer::default();
        assert_eq!(renderer.page_count(Path::new(TEST_PDF_PATH)).await?, 2);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn render_returns_one_image_per_page() -> Result<()> {
        let renderer = PopplerRenderer::default();
        let images = renderer.render(Path::new(TEST_PDF_PATH), 72, 1, 2).await?;
        assert_eq!(images.len(), 2);
        let images = renderer.render(Path::new(TEST_PDF_PATH), 72, 2, 2).await?;
        assert_eq!(images.len(), 1);
        Ok(())
    }
}
