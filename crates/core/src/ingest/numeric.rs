use serde_json::Value;

/// Parses a provider-encoded amount. Total over every input: anything that is not a
/// finite number comes back as `None` (never zero), so "unknown" stays distinct from 0.
///
/// Accepts thousands separators (`1,234,567`) and accounting negatives (`(500)`).
pub fn parse_amount(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }

    let (negated, body) = match t.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        Some(inner) => (true, inner.trim()),
        None => (false, t),
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, ',' | '_') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    // "(-5)" is ambiguous; refuse rather than guess a sign.
    if negated && cleaned.starts_with(['-', '+']) {
        return None;
    }

    // Rust's float parser accepts "inf"/"NaN"; those are not amounts.
    let v = cleaned.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if negated { -v } else { v })
}

/// Same policy as [`parse_amount`] for a raw JSON field value.
pub fn amount_from_value(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::String(s) => parse_amount(s),
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}
