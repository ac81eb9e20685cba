//! Order-key ("O.S.") normalization shared by every cross-system lookup.
//!
//! Source systems disagree on leading zeros, spreadsheet float artifacts
//! (`"7532883.0"`) and optional dash-prefixed segments (`"OS-07532883"`).
//! Intra-system storage stays exact-match; these helpers are only for
//! reconciling keys that arrive from outside.

/// Width operators pad numeric order keys to.
pub const PADDED_WIDTH: usize = 8;

/// Trims whitespace and drops a trailing `.0` left behind when a spreadsheet
/// stored the key as a float. Blank input yields an empty string.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(head) = trimmed.strip_suffix(".0") {
        if is_numeric(head) {
            return head.to_string();
        }
    }
    trimmed.to_string()
}

/// Like [`normalize`] for optional input.
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}

/// Candidate keys to try, most specific first. Empty when the key
/// normalizes to nothing, which callers treat as "no match".
pub fn variants(raw: &str) -> Vec<String> {
    let key = normalize(raw);
    if key.is_empty() {
        return Vec::new();
    }

    let mut out = vec![key.clone()];
    push_numeric_forms(&mut out, &key);

    if let Some((_, tail)) = key.split_once('-') {
        let tail = tail.trim();
        if !tail.is_empty() {
            push_unique(&mut out, tail.to_string());
            push_numeric_forms(&mut out, tail);
        }
    }

    out
}

pub fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Zero-padded to [`PADDED_WIDTH`]; longer keys are returned unchanged.
pub fn zero_padded(value: &str) -> String {
    format!("{:0>width$}", value, width = PADDED_WIDTH)
}

/// Leading zeros removed, keeping at least one digit.
pub fn zero_stripped(value: &str) -> String {
    let stripped = value.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

fn push_numeric_forms(out: &mut Vec<String>, value: &str) {
    if !is_numeric(value) {
        return;
    }
    push_unique(out, zero_padded(value));
    push_unique(out, zero_stripped(value));
}

fn push_unique(out: &mut Vec<String>, value: String) {
    if !out.contains(&value) {
        out.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_float_suffix_only_for_digits() {
        assert_eq!(normalize("  7532883.0 "), "7532883");
        assert_eq!(normalize("ABC.0"), "ABC.0");
        assert_eq!(normalize("12.05"), "12.05");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize_opt(None), "");
    }

    #[test]
    fn numeric_keys_get_padded_and_stripped_forms() {
        assert_eq!(variants("7532883"), vec!["7532883", "07532883"]);
        assert_eq!(variants("07532883"), vec!["07532883", "7532883"]);
        assert_eq!(variants("00012"), vec!["00012", "00000012", "12"]);
        assert_eq!(variants("0000"), vec!["0000", "00000000", "0"]);
    }

    #[test]
    fn dashed_keys_expose_their_tail() {
        assert_eq!(
            variants("OS-0123"),
            vec!["OS-0123", "0123", "00000123", "123"]
        );
        assert_eq!(variants("OS-ABC"), vec!["OS-ABC", "ABC"]);
        assert_eq!(variants("OS-"), vec!["OS-"]);
    }

    #[test]
    fn alphanumeric_keys_have_a_single_form() {
        assert_eq!(variants("TEST123"), vec!["TEST123"]);
        assert!(variants("").is_empty());
        assert!(variants(" \t").is_empty());
    }

    #[test]
    fn numeric_variant_properties_hold_across_widths() {
        for width in 1..=12usize {
            for seed in ["0", "7", "40", "531", "7532883", "1000000000"] {
                let key = format!("{seed:0>width$}");
                let forms = variants(&key);
                assert_eq!(forms[0], key);
                assert!(forms.contains(&zero_padded(&key)), "{key}: {forms:?}");
                assert!(forms.contains(&zero_stripped(&key)), "{key}: {forms:?}");
                assert_eq!(normalize(&normalize(&key)), normalize(&key));
                let float_form = format!("{key}.0");
                assert_eq!(normalize(&normalize(&float_form)), normalize(&float_form));
            }
        }
    }
}
