// Lazily compiled regex accessor shared by the text modules.
macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static regex::Regex {
            static R: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            R.get_or_init(|| regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}

pub mod config;
pub mod engine;
pub mod geometry;
pub mod loader;
pub mod normalize;
pub mod orientation;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod recognizer;
pub mod rules;
pub mod scoring;
pub mod types;

pub use config::{ConfigError, PipelineConfig};
pub use loader::{decode, load_image, validate_path, LoadError, SUPPORTED_EXTENSIONS};
pub use normalize::normalize_text;
pub use pipeline::{
    compose_parser_input, save_lines, PipelineError, ReceiptPipeline, DEFAULT_OUTPUT_FILE,
};
pub use postprocess::{postprocess_line, repair_price_line};
pub use preprocess::{generate_variants, VariantSettings};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError, TesseractRecognizer};
pub use rules::{RuleError, RuleSet};
pub use scoring::{score_text, select_best};
pub use types::{EngineConfig, Hypothesis, Transcription, Variant, VariantKind};
