use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::{EngineConfig, SegmentationMode};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Failed to encode image for the engine: {0}")]
    Encode(String),
}

/// Abstraction over an OCR backend.
///
/// Implementations must be safe to call concurrently: the pipeline fans
/// recognitions out over a worker pool.
pub trait OcrBackend: Send + Sync {
    /// Recognize text in `image` under `config`.
    fn recognize(&self, image: &GrayImage, config: &EngineConfig) -> Result<String, OcrError>;

    /// Clockwise rotation (degrees) that would make the page upright.
    fn detect_rotation(&self, _image: &DynamicImage) -> Result<u32, OcrError> {
        Ok(0)
    }

    /// Fails with [`OcrError::EngineUnavailable`] if the engine cannot run at all.
    fn check_available(&self) -> Result<(), OcrError> {
        Ok(())
    }
}

// ── Mock backends (always available, used for tests) ─────────────────────────

/// Returns a pre-set string — useful for unit testing the pipeline
/// without requiring Tesseract to be installed.
pub struct MockRecognizer {
    pub text: String,
    pub rotation: u32,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), rotation: 0 }
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation = degrees;
        self
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _image: &GrayImage, _config: &EngineConfig) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }

    fn detect_rotation(&self, _image: &DynamicImage) -> Result<u32, OcrError> {
        Ok(self.rotation)
    }
}

/// Delegates every recognition to a closure.
pub struct FnRecognizer<F> {
    f: F,
}

impl<F> FnRecognizer<F>
where
    F: Fn(&GrayImage, &EngineConfig) -> Result<String, OcrError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> OcrBackend for FnRecognizer<F>
where
    F: Fn(&GrayImage, &EngineConfig) -> Result<String, OcrError> + Send + Sync,
{
    fn recognize(&self, image: &GrayImage, config: &EngineConfig) -> Result<String, OcrError> {
        (self.f)(image, config)
    }
}

// ── Tesseract command-line backend ───────────────────────────────────────────

/// Conventional install locations checked after `PATH`.
fn install_locations() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            PathBuf::from(r"C:\Program Files\Tesseract-OCR\tesseract.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe"),
        ]
    } else {
        Vec::new()
    }
}

/// Locate the `tesseract` executable: the explicit path if given (it must
/// exist), otherwise `PATH`, otherwise the conventional Windows installs.
pub fn resolve_tesseract(explicit: Option<&Path>) -> Result<PathBuf, OcrError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(OcrError::EngineUnavailable(format!(
            "Tesseract executable not found at {}",
            path.display()
        )));
    }

    let exe = format!("tesseract{}", std::env::consts::EXE_SUFFIX);
    if let Some(paths) = std::env::var_os("PATH") {
        if let Some(found) = std::env::split_paths(&paths)
            .map(|dir| dir.join(&exe))
            .find(|candidate| candidate.is_file())
        {
            return Ok(found);
        }
    }

    if let Some(found) = install_locations().into_iter().find(|c| c.is_file()) {
        return Ok(found);
    }

    Err(OcrError::EngineUnavailable(
        "Tesseract executable not found. Install Tesseract OCR or configure its path.".into(),
    ))
}

/// Runs the `tesseract` binary once per recognition, piping PNG data over stdin.
pub struct TesseractRecognizer {
    explicit_cmd: Option<PathBuf>,
    tessdata_dir: Option<PathBuf>,
    dpi: u32,
    resolved: OnceLock<Result<PathBuf, String>>,
}

impl TesseractRecognizer {
    pub fn new(explicit_cmd: Option<PathBuf>) -> Self {
        Self { explicit_cmd, tessdata_dir: None, dpi: 300, resolved: OnceLock::new() }
    }

    pub fn with_tessdata_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.tessdata_dir = dir;
        self
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// The resolved executable; resolution happens once per recognizer.
    pub fn executable(&self) -> Result<&Path, OcrError> {
        let resolved = self.resolved.get_or_init(|| {
            resolve_tesseract(self.explicit_cmd.as_deref()).map_err(|e| e.to_string())
        });
        match resolved {
            Ok(path) => Ok(path.as_path()),
            Err(msg) => Err(OcrError::EngineUnavailable(msg.clone())),
        }
    }

    fn run(&self, png: &[u8], args: &[String]) -> Result<String, OcrError> {
        let exe = self.executable()?;
        let mut child = Command::new(exe)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::Engine(format!("failed to start {}: {e}", exe.display())))?;

        // Stdin is closed at the end of this block. The child is reaped below
        // whether or not the write went through.
        let piped = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(png),
            None => Ok(()),
        };

        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::Engine(format!("failed to wait for tesseract: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!("tesseract failed: {}", stderr.trim())));
        }
        match piped {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(OcrError::Engine(
                "tesseract exited before reading the whole image".into(),
            )),
            Err(e) => Err(OcrError::Engine(format!("failed to pipe image: {e}"))),
            Ok(()) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        }
    }

    fn common_args(&self, segmentation: SegmentationMode) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            segmentation.psm().to_string(),
            "--dpi".to_string(),
            self.dpi.to_string(),
        ];
        if let Some(dir) = &self.tessdata_dir {
            args.push("--tessdata-dir".into());
            args.push(dir.display().to_string());
        }
        args
    }

    fn recognition_args(&self, config: &EngineConfig) -> Vec<String> {
        let mut args = self.common_args(config.segmentation);
        args.extend([
            "-l".to_string(),
            config.language.clone(),
            "--oem".to_string(),
            config.engine_mode.oem().to_string(),
            "-c".to_string(),
            "preserve_interword_spaces=1".to_string(),
        ]);
        if let Some(whitelist) = &config.whitelist {
            args.push("-c".into());
            args.push(format!("tessedit_char_whitelist={whitelist}"));
        }
        args
    }
}

impl OcrBackend for TesseractRecognizer {
    fn recognize(&self, image: &GrayImage, config: &EngineConfig) -> Result<String, OcrError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Encode(e.to_string()))?;
        self.run(&png, &self.recognition_args(config))
    }

    fn detect_rotation(&self, image: &DynamicImage) -> Result<u32, OcrError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Encode(e.to_string()))?;
        let report = self.run(&png, &self.common_args(SegmentationMode::OsdOnly))?;
        parse_osd_rotation(&report)
            .ok_or_else(|| OcrError::Engine("no rotation in orientation report".into()))
    }

    fn check_available(&self) -> Result<(), OcrError> {
        self.executable().map(|_| ())
    }
}

re!(re_osd_rotate, r"(?m)^Rotate:\s*(\d+)");

/// Extract the `Rotate: N` value from Tesseract's OSD report.
pub fn parse_osd_rotation(report: &str) -> Option<u32> {
    re_osd_rotate().captures(report)?.get(1)?.as_str().parse().ok()
}
