use rayon::prelude::*;

use crate::recognizer::OcrBackend;
use crate::types::{EngineConfig, Hypothesis, Variant};

/// Recognize every variant under every config.
///
/// Jobs are enumerated variant-major (`index = v * configs.len() + c`) and the
/// results come back sorted by that index whatever order workers finish in.
/// A failed recognition becomes an empty hypothesis carrying its error; it
/// never aborts the others.
pub fn recognize_all<R: OcrBackend + ?Sized>(
    backend: &R,
    variants: &[Variant],
    configs: &[EngineConfig],
) -> Vec<Hypothesis> {
    let jobs: Vec<(usize, &Variant, &EngineConfig)> = variants
        .iter()
        .flat_map(|v| configs.iter().map(move |c| (v, c)))
        .enumerate()
        .map(|(index, (v, c))| (index, v, c))
        .collect();

    let mut hypotheses: Vec<Hypothesis> = jobs
        .into_par_iter()
        .map(|(index, variant, config)| match backend.recognize(&variant.image, config) {
            Ok(text) => Hypothesis {
                index,
                variant: variant.kind,
                config: config.name.clone(),
                text,
                error: None,
            },
            Err(e) => {
                tracing::warn!(variant = %variant.kind, config = %config.name, "recognition failed: {e}");
                Hypothesis {
                    index,
                    variant: variant.kind,
                    config: config.name.clone(),
                    text: String::new(),
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    hypotheses.sort_by_key(|h| h.index);
    hypotheses
}
