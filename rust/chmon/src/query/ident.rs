//! The single gate for splicing client-supplied names into statement text.

/// True when `candidate` matches `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn is_valid_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_column_names() {
        for name in ["event_time", "_internal", "read_rows2", "A"] {
            assert!(is_valid_identifier(name), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_injection_shapes() {
        for name in [
            "",
            "1col",
            "event_time; DROP TABLE x",
            "event time",
            "event_time DESC",
            "a.b",
            "col--",
            "naïve",
            "(select 1)",
        ] {
            assert!(!is_valid_identifier(name), "{name:?} should be rejected");
        }
    }
}
