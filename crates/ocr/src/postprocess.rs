use std::str::FromStr;

use regex::Captures;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::rules::{apply_replacements, LineRules};

re!(re_price_line,
    r"(?P<price>\d+[.,]\d+)(?:\s*\*\s*|\s+)(?P<qty>\d+(?:[.,]\d+)?)(?:\s*=+\s*|\s+)(?P<total>\d+[.,]\d+)");
re!(re_quote_before_qty, r#""(?P<digit>[1-5])"#);
re!(re_equals, r"\s*=\s*");
re!(re_whitespace, r"\s+");

/// Largest gap tolerated between `price * quantity` and the printed total.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);

/// Characters that make up ruler lines printed between receipt sections.
const SEPARATOR_CHARS: &[char] = &['=', '-', '_', '*', '~', '.'];

/// Clean a single receipt line. Returns an empty string for lines that
/// should be dropped.
pub fn postprocess_line(line: &str, rules: &LineRules) -> String {
    let text = line.trim();
    if text.is_empty() {
        return String::new();
    }

    let text = apply_replacements(text, &rules.replacements);
    let text = re_quote_before_qty().replace_all(&text, "*$digit");
    let text = repair_price_line(&text);

    if is_separator_noise(&text) {
        return String::new();
    }

    let mut text = text.as_str();
    for prefix in &rules.strip_prefixes {
        if let Some(rest) = text.strip_prefix(prefix.as_str()) {
            text = rest.trim_start();
        }
    }
    if rules.stray_tokens.iter().any(|t| t == text) {
        return String::new();
    }

    let text = text.replace("\"\"", "\"");
    let text = re_equals().replace_all(&text, " = ");
    re_whitespace().replace_all(&text, " ").trim().to_string()
}

/// Find `price [*] quantity [=] total`, rewrite it as `price *quantity = total`
/// and replace the total when it disagrees with `price * quantity` by more
/// than [`TOTAL_TOLERANCE`]. Lines without the pattern are returned as-is.
pub fn repair_price_line(line: &str) -> String {
    re_price_line()
        .replace(line, |caps: &Captures| {
            let price = &caps["price"];
            let qty = &caps["qty"];
            let total = &caps["total"];
            let repaired = checked_total(price, qty, total).unwrap_or_else(|| total.to_string());
            format!("{price} *{qty} = {repaired}")
        })
        .into_owned()
}

/// `Some(expected)` formatted to two places when the printed total is off.
fn checked_total(price: &str, qty: &str, total: &str) -> Option<String> {
    let price = parse_decimal(price)?;
    let qty = parse_decimal(qty)?;
    let total = parse_decimal(total)?;
    let expected = (price.checked_mul(qty)?)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if (expected - total).abs() > TOTAL_TOLERANCE {
        tracing::debug!(%price, %qty, %total, %expected, "repairing line total");
        Some(format!("{expected:.2}"))
    } else {
        None
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(&s.replace(',', ".")).ok()
}

fn is_separator_noise(line: &str) -> bool {
    if line.starts_with("===") {
        return true;
    }
    let stripped: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    stripped.len() >= 3 && stripped.iter().all(|c| SEPARATOR_CHARS.contains(c))
}
