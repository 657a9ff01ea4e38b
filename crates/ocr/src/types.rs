use image::GrayImage;
use serde::{Deserialize, Serialize};

/// The preprocessing recipe that produced a [`Variant`].
///
/// Declaration order is the enumeration order used by the generator and,
/// through it, the scorer's tie-break.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum VariantKind {
    Contrast,
    Sharpened,
    Otsu,
    Adaptive,
    OtsuInverted,
    AdaptiveInverted,
    Grayscale,
    GrayscaleInverted,
}

impl VariantKind {
    pub const ALL: [VariantKind; 8] = [
        VariantKind::Contrast,
        VariantKind::Sharpened,
        VariantKind::Otsu,
        VariantKind::Adaptive,
        VariantKind::OtsuInverted,
        VariantKind::AdaptiveInverted,
        VariantKind::Grayscale,
        VariantKind::GrayscaleInverted,
    ];
}

impl std::fmt::Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariantKind::Contrast => write!(f, "contrast"),
            VariantKind::Sharpened => write!(f, "sharpened"),
            VariantKind::Otsu => write!(f, "otsu"),
            VariantKind::Adaptive => write!(f, "adaptive-threshold"),
            VariantKind::OtsuInverted => write!(f, "otsu-inverted"),
            VariantKind::AdaptiveInverted => write!(f, "adaptive-inverted"),
            VariantKind::Grayscale => write!(f, "grayscale"),
            VariantKind::GrayscaleInverted => write!(f, "grayscale-inverted"),
        }
    }
}

/// A preprocessed grayscale raster tagged with its recipe.
#[derive(Debug, Clone)]
pub struct Variant {
    pub kind: VariantKind,
    pub image: GrayImage,
}

/// Tesseract page segmentation modes used by the engine configs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// `--psm 0`: orientation and script detection only.
    OsdOnly,
    /// `--psm 4`: a single column of text of variable sizes.
    SingleColumn,
    /// `--psm 6`: a single uniform block of text.
    SingleBlock,
}

impl SegmentationMode {
    pub fn psm(self) -> u8 {
        match self {
            SegmentationMode::OsdOnly => 0,
            SegmentationMode::SingleColumn => 4,
            SegmentationMode::SingleBlock => 6,
        }
    }
}

/// Tesseract recognition engine modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// `--oem 1`: LSTM network only.
    NeuralOnly,
    /// `--oem 3`: legacy + LSTM, whichever the installed models support.
    LegacyAndNeural,
}

impl EngineMode {
    pub fn oem(self) -> u8 {
        match self {
            EngineMode::NeuralOnly => 1,
            EngineMode::LegacyAndNeural => 3,
        }
    }
}

/// Characters allowed by the restricted recognition config.
pub const RECEIPT_WHITELIST: &str = concat!(
    "0123456789",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "abcdefghijklmnopqrstuvwxyz",
    "АБВГДЕЁЖЗИЙКЛМНОПРСТУФХЦЧШЩЪЫЬЭЮЯ",
    "абвгдеёжзийклмнопрстуфхцчшщъыьэюя",
    "№*/.-:",
);

/// One immutable parameter set passed to the OCR engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub name: String,
    pub language: String,
    pub segmentation: SegmentationMode,
    pub engine_mode: EngineMode,
    pub whitelist: Option<String>,
}

impl EngineConfig {
    /// The three configs every variant is recognized under, in enumeration order.
    pub fn receipt_set(primary_language: &str, fallback_language: &str) -> Vec<EngineConfig> {
        vec![
            EngineConfig {
                name: "block".into(),
                language: primary_language.to_string(),
                segmentation: SegmentationMode::SingleBlock,
                engine_mode: EngineMode::LegacyAndNeural,
                whitelist: None,
            },
            EngineConfig {
                name: "column".into(),
                language: primary_language.to_string(),
                segmentation: SegmentationMode::SingleColumn,
                engine_mode: EngineMode::NeuralOnly,
                whitelist: None,
            },
            EngineConfig {
                name: "whitelist".into(),
                language: fallback_language.to_string(),
                segmentation: SegmentationMode::SingleBlock,
                engine_mode: EngineMode::NeuralOnly,
                whitelist: Some(RECEIPT_WHITELIST.to_string()),
            },
        ]
    }
}

/// Raw text produced by one (variant, config) recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    /// Position in the variant-major enumeration of the cross product.
    pub index: usize,
    pub variant: VariantKind,
    pub config: String,
    pub text: String,
    /// Set when the engine call failed; such hypotheses never win on merit.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHypothesis {
    pub hypothesis: Hypothesis,
    pub score: f64,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcription {
    pub lines: Vec<String>,
    pub variant: Option<VariantKind>,
    pub config: Option<String>,
    /// `None` when every hypothesis was empty.
    pub score: Option<f64>,
    pub recognitions: usize,
    pub failed_recognitions: usize,
}

impl Transcription {
    /// Lines with blanks dropped, joined by newlines.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .filter(|l| !l.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_kinds_are_eight_and_distinct() {
        let names: std::collections::HashSet<String> =
            VariantKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names.len(), 8);
        assert_eq!(VariantKind::Adaptive.to_string(), "adaptive-threshold");
        assert_eq!(VariantKind::OtsuInverted.to_string(), "otsu-inverted");
    }

    #[test]
    fn receipt_set_shapes() {
        let set = EngineConfig::receipt_set("rus+eng", "rus");
        assert_eq!(set.len(), 3);
        assert_eq!(set[0].segmentation.psm(), 6);
        assert_eq!(set[1].segmentation.psm(), 4);
        assert_eq!(set[1].engine_mode.oem(), 1);
        assert_eq!(set[2].language, "rus");
        assert!(set[2].whitelist.as_deref().unwrap().contains('№'));
        assert!(set[..2].iter().all(|c| c.whitelist.is_none()));
    }

    #[test]
    fn transcription_text_drops_blank_lines() {
        let t = Transcription {
            lines: vec!["ООО".into(), "".into(), "ИТОГ = 5.00".into()],
            variant: None,
            config: None,
            score: None,
            recognitions: 0,
            failed_recognitions: 0,
        };
        assert_eq!(t.text(), "ООО\nИТОГ = 5.00");
    }

    #[test]
    fn transcription_report_serializes() {
        let t = Transcription {
            lines: vec!["ЧЕК".into()],
            variant: Some(VariantKind::OtsuInverted),
            config: Some("column".into()),
            score: Some(12.5),
            recognitions: 24,
            failed_recognitions: 1,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["variant"], "otsu-inverted");
        assert_eq!(json["config"], "column");
        assert_eq!(json["failed_recognitions"], 1);
    }
}
