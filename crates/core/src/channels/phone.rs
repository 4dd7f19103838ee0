//! US phone number helpers used by provisioning.

const SEPARATORS: &[char] = &[' ', '-', '(', ')', '.'];

/// Strips common separators and prefixes `+` (leading `1`) or `+1`.
pub fn format_e164(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !SEPARATORS.contains(c)).collect();

    if cleaned.starts_with('+') {
        cleaned
    } else if cleaned.starts_with('1') {
        format!("+{cleaned}")
    } else {
        format!("+1{cleaned}")
    }
}

/// Three-digit area code of a NANP number, `None` for anything else.
pub fn extract_area_code(raw: &str) -> Option<String> {
    let formatted = format_e164(raw);
    let digits = formatted.strip_prefix("+1")?;
    let area_code = digits.get(..3)?;
    area_code.chars().all(|c| c.is_ascii_digit()).then(|| area_code.to_string())
}

pub fn is_valid_area_code(value: &str) -> bool {
    value.len() == 3 && value.chars().all(|c| c.is_ascii_digit())
}
