//! Top-level domains delegated by the ICANN root.
//!
//! Names under these TLDs resolve through the conventional DNS and are never
//! sent to the alternate trust root. Membership comes from the ICANN section
//! of the public suffix list; private-section rules are ignored.

use psl::Type;

/// Returns true when `tld` (without dots, any case) is an ICANN TLD.
pub fn is_icann_tld(tld: &str) -> bool {
    let tld = tld.trim_matches('.').to_ascii_lowercase();
    if tld.is_empty() || tld.contains('.') {
        return false;
    }
    // a leading label lets wildcard-only rules such as `*.ck` match
    let name = format!("x.{tld}");
    psl::suffix(name.as_bytes()).is_some_and(|s| s.is_known() && s.typ() == Some(Type::Icann))
}

/// Rightmost label of a host name, ignoring a trailing root dot.
pub fn tld_of(host: &str) -> Option<&str> {
    host.trim_end_matches('.').rsplit('.').next().filter(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tlds() {
        assert!(is_icann_tld("com"));
        assert!(is_icann_tld("UK"));
        assert!(is_icann_tld(".dev"));
        assert!(!is_icann_tld("welcome"));
        assert!(!is_icann_tld("forever"));
        assert!(!is_icann_tld(""));
        assert!(!is_icann_tld("co.uk"));
    }

    #[test]
    fn test_geographic_and_idn_tlds() {
        for tld in ["berlin", "nyc", "london", "tokyo", "xn--p1ai", "ck"] {
            assert!(is_icann_tld(tld), "{tld} is delegated by the ICANN root");
        }
    }

    #[test]
    fn test_tld_of() {
        assert_eq!(tld_of("www.example.com."), Some("com"));
        assert_eq!(tld_of("welcome"), Some("welcome"));
        assert_eq!(tld_of(""), None);
    }
}
