//! Subdomain extraction and validation. The subdomain is the routing key:
//! `club1.clubdeck.app` resolves tenant `club1`.

/// DNS label length cap.
pub const MAX_SUBDOMAIN_LEN: usize = 63;

/// Strict format check: 1-63 chars, lowercase ASCII alphanumeric + hyphen,
/// no leading/trailing hyphen, no consecutive hyphens.
/// e.g. "club1" and "my-club" pass; "Club1", "-club" and "a--b" do not.
pub fn is_valid(subdomain: &str) -> bool {
    if subdomain.is_empty() || subdomain.len() > MAX_SUBDOMAIN_LEN {
        return false;
    }
    let bytes = subdomain.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    let mut prev_hyphen = false;
    for &b in bytes {
        match b {
            b'a'..=b'z' | b'0'..=b'9' => prev_hyphen = false,
            b'-' => {
                if prev_hyphen {
                    return false;
                }
                prev_hyphen = true;
            }
            _ => return false,
        }
    }
    true
}

/// Extract the tenant subdomain from a request hostname. Strips any port,
/// lowercases, then requires the host to be exactly `<label>.<base_domain>`.
/// Returns None for the apex itself, hosts outside the base domain, and
/// multi-level prefixes. e.g. ("club1.clubdeck.app:443", "clubdeck.app") -> "club1".
pub fn from_hostname(hostname: &str, base_domain: &str) -> Option<String> {
    // Only strip a numeric port suffix.
    let host = hostname.rsplit_once(':').map_or(hostname, |(h, port)| {
        if port.bytes().all(|b| b.is_ascii_digit()) {
            h
        } else {
            hostname
        }
    });
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let base = base_domain.trim_end_matches('.').to_ascii_lowercase();

    let prefix = host.strip_suffix(&base)?.strip_suffix('.')?;
    if prefix.is_empty() || prefix.contains('.') {
        return None;
    }
    Some(prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_hyphenated_labels() {
        assert!(is_valid("club1"));
        assert!(is_valid("my-club"));
        assert!(is_valid("a"));
        assert!(is_valid(&"x".repeat(63)));
    }

    #[test]
    fn rejects_bad_labels() {
        assert!(!is_valid(""));
        assert!(!is_valid(&"x".repeat(64)));
        assert!(!is_valid("-club"));
        assert!(!is_valid("club-"));
        assert!(!is_valid("a--b"));
        assert!(!is_valid("Club1"));
        assert!(!is_valid("club_1"));
        assert!(!is_valid("invalid..subdomain"));
    }

    #[test]
    fn extracts_label_under_base_domain() {
        assert_eq!(
            from_hostname("club1.clubdeck.app", "clubdeck.app"),
            Some("club1".into())
        );
        assert_eq!(
            from_hostname("Club1.Clubdeck.App:443", "clubdeck.app"),
            Some("club1".into())
        );
    }

    #[test]
    fn rejects_apex_foreign_and_nested_hosts() {
        assert_eq!(from_hostname("clubdeck.app", "clubdeck.app"), None);
        assert_eq!(from_hostname("example.com", "clubdeck.app"), None);
        assert_eq!(from_hostname("a.b.clubdeck.app", "clubdeck.app"), None);
        assert_eq!(from_hostname("evilclubdeck.app", "clubdeck.app"), None);
    }
}
