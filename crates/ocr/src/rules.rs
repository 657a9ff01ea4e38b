use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const BUILTIN_RULES: &str = include_str!("../rules/ru_receipts.toml");

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse rule TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A plain `from -> to` substring replacement.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

/// One entry of the known-error table as written in TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PhraseRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub regex: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LineRules {
    pub replacements: Vec<Replacement>,
    /// Prefixes stripped from the start of a line.
    pub strip_prefixes: Vec<String>,
    /// Whole lines that carry no information and are dropped.
    pub stray_tokens: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RuleFile {
    keywords: Vec<String>,
    punctuation: Vec<Replacement>,
    lookalikes: HashMap<char, char>,
    cleanup: Vec<Replacement>,
    phrases: Vec<PhraseRule>,
    lines: LineRules,
}

/// Internal pairing of a phrase rule with its precompiled regex (if applicable).
#[derive(Debug, Clone)]
enum CompiledPhrase {
    Literal { from: String, to: String },
    Pattern { regex: Regex, replacement: String },
}

/// The substitution tables and scoring keywords for one receipt family.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub keywords: Vec<String>,
    pub punctuation: Vec<Replacement>,
    pub lookalikes: HashMap<char, char>,
    pub cleanup: Vec<Replacement>,
    phrases: Vec<CompiledPhrase>,
    pub lines: LineRules,
}

impl RuleSet {
    /// The embedded Russian receipt profile.
    pub fn builtin() -> Result<Self, RuleError> {
        Self::from_toml(BUILTIN_RULES)
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(toml_content)?;
        let phrases = file
            .phrases
            .into_iter()
            .filter(|p| p.pattern != p.replacement)
            .map(|p| {
                if p.regex {
                    let regex = Regex::new(&p.pattern)
                        .map_err(|source| RuleError::Pattern { pattern: p.pattern.clone(), source })?;
                    Ok(CompiledPhrase::Pattern { regex, replacement: p.replacement })
                } else {
                    Ok(CompiledPhrase::Literal { from: p.pattern, to: p.replacement })
                }
            })
            .collect::<Result<Vec<_>, RuleError>>()?;

        Ok(Self {
            keywords: file.keywords,
            punctuation: file.punctuation,
            lookalikes: file.lookalikes,
            cleanup: file.cleanup,
            phrases,
            lines: file.lines,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    /// Run the known-error table over `text`, in table order.
    pub fn apply_phrases(&self, text: &str) -> String {
        let mut out = text.to_string();
        for phrase in &self.phrases {
            match phrase {
                CompiledPhrase::Literal { from, to } => {
                    if out.contains(from.as_str()) {
                        out = out.replace(from.as_str(), to);
                    }
                }
                CompiledPhrase::Pattern { regex, replacement } => {
                    out = regex.replace_all(&out, replacement.as_str()).into_owned();
                }
            }
        }
        out
    }
}

/// Apply literal replacements in order.
pub fn apply_replacements(text: &str, replacements: &[Replacement]) -> String {
    replacements
        .iter()
        .fold(text.to_string(), |acc, r| acc.replace(r.from.as_str(), &r.to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profile_loads() {
        let rules = RuleSet::builtin().unwrap();
        assert_eq!(rules.keywords.len(), 5);
        assert!(rules.keywords.iter().any(|k| k == "НДС"));
        assert_eq!(rules.lookalikes.get(&'H'), Some(&'Н'));
        assert_eq!(rules.lookalikes.len(), 21);
        assert!(rules.phrase_count() > 40);
        assert_eq!(rules.lines.stray_tokens, vec!["г".to_string(), "1".to_string()]);
    }

    #[test]
    fn phrases_apply_in_order() {
        let toml = r#"
            phrases = [
                { pattern = "AB", replacement = "X" },
                { pattern = "XC", replacement = "done" },
            ]
        "#;
        let rules = RuleSet::from_toml(toml).unwrap();
        assert_eq!(rules.apply_phrases("ABC"), "done");
    }

    #[test]
    fn regex_phrase_uses_capture_groups() {
        let rules = RuleSet::builtin().unwrap();
        assert_eq!(rules.apply_phrases("0ОО \"ЛЕНТА\" 0БЛ."), "ООО \"ЛЕНТА\" ОБЛ.");
        assert_eq!(rules.apply_phrases("000 ЛЕНТА"), "ООО \"ЛЕНТА\"");
    }

    #[test]
    fn identity_rules_are_skipped() {
        let toml = r#"phrases = [{ pattern = "DIROL", replacement = "DIROL" }]"#;
        assert_eq!(RuleSet::from_toml(toml).unwrap().phrase_count(), 0);
    }

    #[test]
    fn invalid_regex_fails_at_load() {
        let toml = r#"phrases = [{ pattern = "(", replacement = "", regex = true }]"#;
        assert!(matches!(RuleSet::from_toml(toml), Err(RuleError::Pattern { .. })));
    }

    #[test]
    fn empty_document_is_an_empty_rule_set() {
        let rules = RuleSet::from_toml("").unwrap();
        assert!(rules.keywords.is_empty());
        assert_eq!(rules.apply_phrases("unchanged"), "unchanged");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, "keywords = [\"ИТОГ\"]\n").unwrap();
        assert_eq!(RuleSet::load(&path).unwrap().keywords, vec!["ИТОГ".to_string()]);
    }
}
