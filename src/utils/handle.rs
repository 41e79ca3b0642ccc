/// Checks the atproto handle syntax: a DNS name of at least two labels,
/// each 1-63 ASCII alphanumerics or hyphens without a leading or trailing
/// hyphen, whose last label starts with a letter. At most 253 characters.
pub fn is_valid_handle(handle: &str) -> bool {
    if handle.is_empty() || handle.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = handle.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    labels_ok
        && labels
            .last()
            .and_then(|tld| tld.chars().next())
            .is_some_and(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::is_valid_handle;

    #[test]
    fn accepts_common_handles() {
        for handle in ["alice.bsky.social", "example.com", "xn--ls8h.test", "a-b.c1.io"] {
            assert!(is_valid_handle(handle), "{} should be valid", handle);
        }
    }

    #[test]
    fn rejects_malformed_handles() {
        let too_long = format!("{}.com", "a.".repeat(126));
        for handle in [
            "not_a_handle",
            "localhost",
            "",
            "alice..test",
            "-alice.test",
            "alice-.test",
            "alice.123",
            "alice.test.",
            "al ice.test",
            too_long.as_str(),
        ] {
            assert!(!is_valid_handle(handle), "{:?} should be invalid", handle);
        }
    }
}
