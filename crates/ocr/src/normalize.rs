use crate::rules::{apply_replacements, RuleSet};

re!(re_space_runs, r"[ ]{2,}");

/// Clean the winning hypothesis before it is split into lines.
///
/// Quotes are canonicalized, Latin look-alikes become Cyrillic, runs of
/// spaces collapse, then the known-error table runs in order. Rules that do
/// not match are no-ops.
pub fn normalize_text(text: &str, rules: &RuleSet) -> String {
    let text = apply_replacements(text, &rules.punctuation);
    let text = transliterate(&text, rules);
    let text = apply_replacements(&text, &rules.cleanup);
    let text = re_space_runs().replace_all(&text, " ");
    rules.apply_phrases(&text)
}

fn transliterate(text: &str, rules: &RuleSet) -> String {
    text.chars()
        .map(|c| rules.lookalikes.get(&c).copied().unwrap_or(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::builtin().unwrap()
    }

    #[test]
    fn latin_lookalikes_become_cyrillic() {
        // "KACCA" typed with Latin letters.
        assert_eq!(normalize_text("KACCA", &rules()), "КАССА");
        assert_eq!(normalize_text("Cyмма", &rules()), "Сумма");
    }

    #[test]
    fn letters_without_lookalikes_are_kept() {
        assert_eq!(normalize_text("SPLAT", &rules()), "SРLАТ");
        assert_eq!(normalize_text("zinc", &rules()), "zinс");
    }

    #[test]
    fn quotes_and_guillemets_are_canonical() {
        assert_eq!(normalize_text("“ЛЕНТА”", &rules()), "\"ЛЕНТА\"");
        assert_eq!(normalize_text("«ЛЕНТА»", &rules()), "*ЛЕНТА");
        assert_eq!(normalize_text("„Д”", &rules()), "\"Д\"");
    }

    #[test]
    fn space_runs_collapse_but_newlines_survive() {
        assert_eq!(normalize_text("ИТОГ    5.00\n\nСДАЧА  0", &rules()), "ИТОГ 5.00\n\nСДАЧА 0");
    }

    #[test]
    fn pipes_and_dashes_are_cleaned() {
        assert_eq!(normalize_text("ИТОГ | 5 — 3", &rules()), "ИТОГ 5 - 3");
    }

    #[test]
    fn known_errors_are_repaired() {
        assert_eq!(normalize_text("HAC 20%", &rules()), "НДС 20%");
        assert_eq!(normalize_text("ОПЛАТА ВЕЗНАЛИЧНЫМИ", &rules()), "ОПЛАТА БЕЗНАЛИЧНЫМИ");
        assert_eq!(normalize_text("0HЛАЙН", &rules()), "ОНЛАЙН");
        assert_eq!(normalize_text("DIROL", &rules()), "DIROL");
    }

    #[test]
    fn nothing_to_fix_is_a_no_op() {
        let text = "КАССОВЫЙ ЧЕК\nСУММА 120.00";
        assert_eq!(normalize_text(text, &rules()), text);
    }

    #[test]
    fn empty_input() {
        assert_eq!(normalize_text("", &rules()), "");
    }
}
