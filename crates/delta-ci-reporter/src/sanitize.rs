//! Shared text sanitization (spec §4.6, §6): every user- or AI-supplied
//! string surfaced in a report goes through here so the single-line
//! invariant has one implementation, not two copies that can drift.

/// Replaces CR/LF with spaces and caps the result at `max_bytes`,
/// truncating on a char boundary.
pub fn sanitize_line(input: &str, max_bytes: usize) -> String {
    let flattened: String = input.chars().map(|c| if c == '\r' || c == '\n' { ' ' } else { c }).collect();
    if flattened.len() <= max_bytes {
        return flattened;
    }
    let mut end = max_bytes;
    while end > 0 && !flattened.is_char_boundary(end) {
        end -= 1;
    }
    flattened[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_crlf_with_spaces() {
        assert_eq!(sanitize_line("line one\r\nline two\n", 100), "line one  line two ");
    }

    #[test]
    fn truncates_to_max_bytes() {
        let long = "a".repeat(600);
        assert_eq!(sanitize_line(&long, 512).len(), 512);
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let input = "a".repeat(511) + "\u{00e9}\u{00e9}";
        let result = sanitize_line(&input, 512);
        assert!(result.len() <= 512);
        assert!(String::from_utf8(result.into_bytes()).is_ok());
    }
}
