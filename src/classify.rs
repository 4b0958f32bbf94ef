//! Connectivity failure classification
//!
//! A failure is connectivity-level when its text mentions one of a small set
//! of phrases. Matching is case-insensitive because the phrases come from
//! different layers (OS errors, libssh2, module authors).

/// Phrases that mark a host as unreachable
const CONNECTIVITY_PHRASES: &[&str] = &["connection refused", "no route to host", "connection failed"];

/// Returns `true` if `text` describes host or network unreachability.
pub fn is_connectivity_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONNECTIVITY_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_each_phrase() {
        assert!(is_connectivity_error("dial tcp 10.0.0.5:22: connection refused"));
        assert!(is_connectivity_error("connect: no route to host"));
        assert!(is_connectivity_error("SSH connection failed: timeout"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(is_connectivity_error("Connection Refused (os error 111)"));
        assert!(is_connectivity_error("NO ROUTE TO HOST"));
    }

    #[test]
    fn test_unrelated_errors() {
        assert!(!is_connectivity_error("permission denied"));
        assert!(!is_connectivity_error("exit status 1"));
        assert!(!is_connectivity_error(""));
    }

    #[test]
    fn test_pure() {
        let text = "Connection refused";
        assert_eq!(is_connectivity_error(text), is_connectivity_error(text));
    }
}
