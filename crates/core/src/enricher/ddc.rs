//! Cleanup of Dewey-style classification strings from external sources.

/// Normalizes a raw classification string.
///
/// Segmentation marks (`/`, `'`) are dropped and the integer class is padded
/// to three digits. Fiction and biography shorthands map to their classes.
/// Returns `None` for anything that is not a Dewey-style number.
///
/// ```
/// use librarian_core::enricher::normalize_ddc;
/// assert_eq!(normalize_ddc("005.1/33").as_deref(), Some("005.133"));
/// assert_eq!(normalize_ddc("5.1").as_deref(), Some("005.1"));
/// assert_eq!(normalize_ddc("[Fic]").as_deref(), Some("823"));
/// assert_eq!(normalize_ddc("QA76.76"), None);
/// ```
pub fn normalize_ddc(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .trim_matches(|c| c == '[' || c == ']')
        .chars()
        .filter(|c| *c != '/' && *c != '\'' && !c.is_whitespace())
        .collect();

    match cleaned.to_ascii_uppercase().as_str() {
        "FIC" | "F" => return Some("823".to_string()),
        "B" | "BIO" | "92" => return Some("920".to_string()),
        _ => {}
    }

    let integer: String = cleaned.chars().take_while(|c| c.is_ascii_digit()).collect();
    if integer.is_empty() || integer.len() > 3 {
        return None;
    }
    let rest = &cleaned[integer.len()..];
    let fraction: String = match rest.strip_prefix('.') {
        Some(after) => after.chars().take_while(|c| c.is_ascii_digit()).collect(),
        None if rest.is_empty() || !rest.starts_with(|c: char| c.is_ascii_alphanumeric()) => {
            String::new()
        }
        None => return None,
    };

    let padded = format!("{:0>3}", integer);
    if fraction.is_empty() {
        Some(padded)
    } else {
        Some(format!("{}.{}", padded, fraction))
    }
}

/// The integer class (0..=999) of a normalized code.
pub fn ddc_class(code: &str) -> Option<u16> {
    let integer: String = code.chars().take_while(|c| c.is_ascii_digit()).collect();
    if integer.is_empty() || integer.len() > 3 {
        return None;
    }
    integer.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_decimals() {
        assert_eq!(normalize_ddc("823.914").as_deref(), Some("823.914"));
        assert_eq!(normalize_ddc(" 005.1 ").as_deref(), Some("005.1"));
        assert_eq!(normalize_ddc("813/.54").as_deref(), Some("813.54"));
    }

    #[test]
    fn test_normalize_pads_integer_class() {
        assert_eq!(normalize_ddc("5").as_deref(), Some("005"));
        assert_eq!(normalize_ddc("20.5").as_deref(), Some("020.5"));
    }

    #[test]
    fn test_normalize_shorthands() {
        assert_eq!(normalize_ddc("FIC").as_deref(), Some("823"));
        assert_eq!(normalize_ddc("B").as_deref(), Some("920"));
    }

    #[test]
    fn test_normalize_rejects_non_dewey() {
        assert_eq!(normalize_ddc(""), None);
        assert_eq!(normalize_ddc("PS3552.R685"), None);
        assert_eq!(normalize_ddc("1234"), None);
        assert_eq!(normalize_ddc("813a"), None);
    }

    #[test]
    fn test_ddc_class() {
        assert_eq!(ddc_class("005.1"), Some(5));
        assert_eq!(ddc_class("813"), Some(813));
        assert_eq!(ddc_class("Unclassified"), None);
    }
}
