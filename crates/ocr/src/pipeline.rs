use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::engine::recognize_all;
use crate::loader::{self, LoadError};
use crate::normalize::normalize_text;
use crate::orientation::normalize_orientation;
use crate::postprocess::postprocess_line;
use crate::preprocess::{generate_variants, VariantSettings};
use crate::recognizer::{OcrBackend, OcrError};
use crate::rules::{RuleError, RuleSet};
use crate::scoring::select_best;
use crate::types::{EngineConfig, Hypothesis, Transcription, Variant};

/// File written by [`save_lines`] when no destination is given.
pub const DEFAULT_OUTPUT_FILE: &str = "receipt_text.txt";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rules(#[from] RuleError),
}

/// Orchestrates: validate → orient → variants → recognize × configs → score →
/// normalize → per-line cleanup.
pub struct ReceiptPipeline<R: OcrBackend> {
    recognizer: R,
    rules: RuleSet,
    engine_configs: Vec<EngineConfig>,
    settings: VariantSettings,
    threads: Option<usize>,
}

impl<R: OcrBackend> ReceiptPipeline<R> {
    pub fn new(recognizer: R, config: &PipelineConfig, rules: RuleSet) -> Self {
        Self {
            recognizer,
            rules,
            engine_configs: config.engine_configs(),
            settings: config.variant_settings(),
            threads: config.threads,
        }
    }

    /// Build with the rule table named in `config`, or the built-in one.
    pub fn from_config(recognizer: R, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let rules = match &config.rules {
            Some(path) => RuleSet::load(path)?,
            None => RuleSet::builtin()?,
        };
        Ok(Self::new(recognizer, config, rules))
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Transcribe one receipt image. Every postprocessed line is kept, blank
    /// ones included, so callers can choose how to filter.
    pub fn run(&self, path: &Path) -> Result<Transcription, PipelineError> {
        let format = loader::validate_path(path)?;
        self.recognizer.check_available()?;
        let image = loader::decode(path, format)?;

        let image = normalize_orientation(image, &self.recognizer);
        let variants = generate_variants(&image, &self.settings);
        tracing::debug!(variants = variants.len(), configs = self.engine_configs.len(), "recognizing");

        let hypotheses = self.recognize(&variants);
        let recognitions = hypotheses.len();
        let failed_recognitions = hypotheses.iter().filter(|h| h.error.is_some()).count();

        let Some(best) = select_best(hypotheses, &self.rules.keywords) else {
            return Ok(Transcription {
                recognitions,
                failed_recognitions,
                ..Transcription::default()
            });
        };
        tracing::debug!(
            variant = %best.hypothesis.variant,
            config = %best.hypothesis.config,
            score = best.score,
            "selected hypothesis"
        );

        let normalized = normalize_text(&best.hypothesis.text, &self.rules);
        let lines = normalized
            .lines()
            .map(|line| postprocess_line(line, &self.rules.lines))
            .collect();

        Ok(Transcription {
            lines,
            variant: Some(best.hypothesis.variant),
            config: Some(best.hypothesis.config),
            score: best.score.is_finite().then_some(best.score),
            recognitions,
            failed_recognitions,
        })
    }

    fn recognize(&self, variants: &[Variant]) -> Vec<Hypothesis> {
        if let Some(threads) = self.threads {
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => {
                    return pool.install(|| recognize_all(&self.recognizer, variants, &self.engine_configs));
                }
                Err(e) => tracing::warn!("falling back to the global worker pool: {e}"),
            }
        }
        recognize_all(&self.recognizer, variants, &self.engine_configs)
    }

    /// Postprocessed lines; blank lines are dropped unless `preserve_empty`.
    pub fn parse_lines(&self, path: &Path, preserve_empty: bool) -> Result<Vec<String>, PipelineError> {
        let transcription = self.run(path)?;
        if preserve_empty {
            return Ok(transcription.lines.into_iter().map(|l| l.trim_end().to_string()).collect());
        }
        Ok(transcription.lines.into_iter().filter(|l| !l.is_empty()).collect())
    }

    /// The text handed to the downstream parser: non-empty lines joined by `\n`.
    pub fn extract_text(&self, path: &Path) -> Result<String, PipelineError> {
        Ok(self.parse_lines(path, false)?.join("\n"))
    }

    pub fn parse_and_save(
        &self,
        path: &Path,
        output: Option<&Path>,
        preserve_empty: bool,
    ) -> Result<PathBuf, PipelineError> {
        let lines = self.parse_lines(path, preserve_empty)?;
        save_lines(&lines, output)
    }
}

/// Write `lines` as UTF-8 with a byte-order mark. Without `output` the file
/// is [`DEFAULT_OUTPUT_FILE`] in the working directory.
pub fn save_lines<S: AsRef<str>>(lines: &[S], output: Option<&Path>) -> Result<PathBuf, PipelineError> {
    let dest = output.map_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE), Path::to_path_buf);
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut content = String::from('\u{FEFF}');
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            content.push('\n');
        }
        content.push_str(line.as_ref());
    }
    std::fs::write(&dest, content)?;
    tracing::debug!(path = %dest.display(), lines = lines.len(), "saved transcription");
    Ok(dest)
}

/// Prepend an optional hint, separated by a blank line, to the transcription.
pub fn compose_parser_input(hint: Option<&str>, text: &str) -> String {
    match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => format!("{hint}\n\n{text}"),
        None => text.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{FnRecognizer, MockRecognizer};
    use crate::types::{EngineConfig, VariantKind};
    use image::{GrayImage, ImageBuffer, Luma};

    fn small_config() -> PipelineConfig {
        PipelineConfig { min_working_size: 64, threads: Some(2), ..PipelineConfig::default() }
    }

    fn pipeline<R: OcrBackend>(recognizer: R) -> ReceiptPipeline<R> {
        ReceiptPipeline::from_config(recognizer, &small_config()).unwrap()
    }

    fn receipt_png(dir: &Path) -> PathBuf {
        let img: GrayImage = ImageBuffer::from_fn(48, 32, |x, y| {
            if (8..40).contains(&x) && y % 8 == 4 { Luma([0u8]) } else { Luma([255u8]) }
        });
        let path = dir.join("receipt.png");
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn mock_text_is_normalized_and_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let p = pipeline(MockRecognizer::new(
            "000 ЛEHTA\n\nKACCOBЫЙ ЧЕК\n==========\nХЛЕБ 49.90 * 2 = 89.00\nHAC 20: 16.63",
        ));

        let text = p.extract_text(&path).unwrap();
        assert_eq!(
            text,
            "ООО \"ЛЕНТА\"\nКАССОВЫЙ ЧЕК\nХЛЕБ 49.90 *2 = 99.80\nНДС 20% 16.63"
        );
    }

    #[test]
    fn ties_resolve_to_first_variant_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let report = pipeline(MockRecognizer::new("КАССИР")).run(&path).unwrap();
        assert_eq!(report.variant, Some(VariantKind::Contrast));
        assert_eq!(report.config.as_deref(), Some("block"));
        assert_eq!(report.recognitions, 24);
        assert_eq!(report.failed_recognitions, 0);
        assert!(report.score.is_some());
    }

    #[test]
    fn best_hypothesis_wins_regardless_of_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let p = pipeline(FnRecognizer::new(|_: &GrayImage, cfg: &EngineConfig| {
            if cfg.name == "whitelist" {
                Ok("КАССОВЫЙ ЧЕК\nСУММА 120.00".to_string())
            } else {
                Ok("x".to_string())
            }
        }));
        let report = p.run(&path).unwrap();
        assert_eq!(report.config.as_deref(), Some("whitelist"));
        assert_eq!(report.text(), "КАССОВЫЙ ЧЕК\nСУММА 120.00");
    }

    #[test]
    fn all_blank_output_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let p = pipeline(MockRecognizer::new(""));
        assert_eq!(p.extract_text(&path).unwrap(), "");
        assert!(p.parse_lines(&path, false).unwrap().is_empty());
        let report = p.run(&path).unwrap();
        assert_eq!(report.variant, Some(VariantKind::Contrast));
        assert_eq!(report.score, None);
    }

    #[test]
    fn failed_recognitions_degrade() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let p = pipeline(FnRecognizer::new(|_: &GrayImage, cfg: &EngineConfig| {
            if cfg.name == "column" {
                Err(OcrError::Engine("crashed".into()))
            } else {
                Ok("ЧЕК".to_string())
            }
        }));
        let report = p.run(&path).unwrap();
        assert_eq!(report.failed_recognitions, 8);
        assert_eq!(report.text(), "ЧЕК");
    }

    #[test]
    fn runs_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let p = pipeline(FnRecognizer::new(|img: &GrayImage, cfg: &EngineConfig| {
            let ink = img.pixels().filter(|p| p.0[0] < 128).count();
            Ok(format!("{} {ink}", cfg.name))
        }));
        assert_eq!(p.extract_text(&path).unwrap(), p.extract_text(&path).unwrap());
    }

    #[test]
    fn unavailable_engine_is_fatal() {
        struct Missing;
        impl OcrBackend for Missing {
            fn recognize(&self, _: &GrayImage, _: &EngineConfig) -> Result<String, OcrError> {
                Ok("unreachable".into())
            }
            fn check_available(&self) -> Result<(), OcrError> {
                Err(OcrError::EngineUnavailable("no tesseract".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let err = pipeline(Missing).run(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Ocr(OcrError::EngineUnavailable(_))));
    }

    #[test]
    fn input_errors_come_before_engine_checks() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(MockRecognizer::new("x"));
        assert!(matches!(
            p.run(&dir.path().join("missing.jpg")),
            Err(PipelineError::Load(LoadError::NotFound(_)))
        ));
        assert!(matches!(
            p.run(&dir.path().join("receipt.gif")),
            Err(PipelineError::Load(LoadError::UnsupportedFormat(_)))
        ));
    }

    #[test]
    fn blank_lines_can_be_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let p = pipeline(MockRecognizer::new("ИТОГ 5.00\n\n=====\nСПАСИБО"));
        assert_eq!(p.parse_lines(&path, true).unwrap(), vec!["ИТОГ 5.00", "", "", "СПАСИБО"]);
        assert_eq!(p.parse_lines(&path, false).unwrap(), vec!["ИТОГ 5.00", "СПАСИБО"]);
    }

    #[test]
    fn saved_file_has_bom_and_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out").join("receipt.txt");
        let dest = save_lines(&["ИТОГ 5.00", "", "СПАСИБО"], Some(&out)).unwrap();
        assert_eq!(dest, out);
        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
        assert_eq!(std::str::from_utf8(&bytes[3..]).unwrap(), "ИТОГ 5.00\n\nСПАСИБО");
    }

    #[test]
    fn parse_and_save_writes_primary_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = receipt_png(dir.path());
        let out = dir.path().join("text.txt");
        let p = pipeline(MockRecognizer::new("ЧЕК\n\nИТОГ"));
        p.parse_and_save(&path, Some(&out), false).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert_eq!(content, "\u{FEFF}ЧЕК\nИТОГ");
    }

    #[test]
    fn parser_input_prepends_hint() {
        assert_eq!(compose_parser_input(Some("Магазин Лента"), "ЧЕК"), "Магазин Лента\n\nЧЕК");
        assert_eq!(compose_parser_input(Some("  "), "ЧЕК"), "ЧЕК");
        assert_eq!(compose_parser_input(None, "ЧЕК"), "ЧЕК");
    }
}
