//! Tesseract OCR engine.

use std::{
    fs::{File, read_to_string},
    io::{self, Cursor, Write as _},
    sync::LazyLock,
};

use image::{DynamicImage, ImageFormat};
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{blocking::spawn_blocking_propagating_panics, check_for_command_failure},
    errors::ConvertError,
    prelude::*,
};

use super::TextRecognizer;

/// How to install Tesseract, for error messages.
const TESSERACT_HINT: &str = "install tesseract-ocr, `brew install tesseract` on macOS, or see https://github.com/UB-Mannheim/tesseract/wiki on Windows";

/// Matches the first line of `tesseract --version`.
static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^tesseract\s+v?(\d+(?:\.\d+)*)").expect("failed to compile regex")
});

/// OCR engine wrapping the `tesseract` CLI tool.
///
/// The executable is part of the engine instance, so different engines (and
/// tests) never interfere with each other.
#[derive(Clone, Debug)]
pub struct TesseractRecognizer {
    /// The `tesseract` executable to run.
    command: PathBuf,
}

impl TesseractRecognizer {
    /// Create a new engine. If `command` is `None`, we search `PATH`.
    pub fn new(command: Option<PathBuf>) -> Self {
        Self {
            command: command.unwrap_or_else(|| PathBuf::from("tesseract")),
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn check_available(&self) -> Result<()> {
        let missing = || ConvertError::DependencyMissing {
            tool: self.command.display().to_string(),
            hint: TESSERACT_HINT,
        };
        let output = match Command::new(&self.command).arg("--version").output().await {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(missing().into());
            }
            Err(err) => return Err(err).context("cannot run tesseract"),
        };
        if !output.status.success() {
            return Err(missing().into());
        }

        // Some versions print this to stdout, and some to stderr.
        let mut version_output = String::from_utf8_lossy(&output.stdout).into_owned();
        version_output.push_str(&String::from_utf8_lossy(&output.stderr));
        match parse_tesseract_version(&version_output) {
            Some(version) => debug!(version, "Found tesseract"),
            None => warn!("could not determine tesseract version"),
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(lang = %lang, config = %config))]
    async fn recognize(
        &self,
        image: DynamicImage,
        lang: &str,
        config: &str,
    ) -> Result<String> {
        // Encode our page as PNG on the blocking pool.
        let png = spawn_blocking_propagating_panics(move || -> Result<Vec<u8>> {
            let mut png = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .context("cannot encode page as PNG")?;
            Ok(png)
        })
        .await??;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        let output_path = tmpdir.path().join("output.txt");
        let mut input_file =
            File::create(&input_path).context("cannot create tesseract input file")?;
        input_file
            .write_all(&png)
            .context("cannot write tesseract input file")?;
        input_file
            .flush()
            .context("cannot flush tesseract input file")?;

        // Run tesseract on the input file. Tesseract adds `.txt` to the output
        // base name itself.
        let output = Command::new(&self.command)
            .arg(&input_path)
            .arg(output_path.with_extension(""))
            .arg("-l")
            .arg(lang)
            .args(config_args(config))
            .output()
            .await
            .context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output, None)?;

        // Read the output file.
        read_to_string(&output_path).context("cannot read tesseract output file")
    }
}

/// Split an engine configuration string like `--psm 6 --oem 1` into arguments.
fn config_args(config: &str) -> impl Iterator<Item = &str> {
    config.split_whitespace()
}

/// Find the version number in `tesseract --version` output.
fn parse_tesseract_version(output: &str) -> Option<&str> {
    VERSION_REGEX
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|version| version.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_split_on_whitespace() {
        let args = config_args("  --psm 6   --oem 1 ").collect::<Vec<_>>();
        assert_eq!(args, vec!["--psm", "6", "--oem", "1"]);
        assert_eq!(config_args("").count(), 0);
    }

    #[test]
    fn parses_versions() {
        assert_eq!(
            parse_tesseract_version("tesseract 5.3.4\n leptonica-1.84.1\n"),
            Some("5.3.4")
        );
        assert_eq!(
            parse_tesseract_version("tesseract v4.0.0.20181030\n"),
            Some("4.0.0.20181030")
        );
        assert_eq!(parse_tesseract_version("something else"), None);
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let engine = TesseractRecognizer::new(Some(PathBuf::from(
            "/nonexistent/bin/tesseract",
        )));
        let err = engine.check_available().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::DependencyMissing { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "Requires tesseract to be installed"]
    async fn blank_page_has_no_text() -> Result<()> {
        let engine = TesseractRecognizer::new(None);
        engine.check_available().await?;
        let image = DynamicImage::new_luma8(200, 200);
        let text = engine.recognize(image, "eng", "--psm 6").await?;
        assert!(text.trim().is_empty());
        Ok(())
    }
}
