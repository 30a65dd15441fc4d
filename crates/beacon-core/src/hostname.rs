//! Host name canonicalisation and DNSSEC eligibility.

use url::Host;

use crate::tld::{is_icann_tld, tld_of};

/// Canonical form of a host name, or `None` if it is an IP literal or
/// cannot be canonicalised.
///
/// Bare IPv6 addresses are accepted without brackets.
pub fn canonical_domain(hostname: &str) -> Option<String> {
    let input = if hostname.contains(':') && !hostname.starts_with('[') {
        format!("[{hostname}]")
    } else {
        hostname.to_owned()
    };

    match Host::parse(&input).ok()? {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_owned();
            (!domain.is_empty()).then_some(domain)
        }
        Host::Ipv4(_) | Host::Ipv6(_) => None,
    }
}

/// Returns true if the name has a registrable domain under an ICANN TLD.
///
/// A bare TLD is not itself registry controlled.
fn has_registry_controlled_domain(canonical: &str) -> bool {
    canonical.contains('.') && tld_of(canonical).is_some_and(is_icann_tld)
}

/// Returns true when `hostname` must bypass the alternate trust root:
/// IP literals, malformed names and names under ICANN TLDs.
pub fn is_non_dnssec_host(hostname: &str) -> bool {
    canonical_domain(hostname).map_or(true, |c| has_registry_controlled_domain(&c))
}

/// Inverse of [`is_non_dnssec_host`].
pub fn is_dnssec_eligible(hostname: &str) -> bool {
    !is_non_dnssec_host(hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_literals_are_not_eligible() {
        for host in ["127.0.0.1", "::1", "[::1]", "2001:db8::1", "0x7f.1"] {
            assert!(is_non_dnssec_host(host), "{host} should be skipped");
        }
    }

    #[test]
    fn test_malformed_names_are_not_eligible() {
        for host in ["", "exa mple", "[not-an-ip]"] {
            assert!(is_non_dnssec_host(host), "{host:?} should be skipped");
        }
    }

    #[test]
    fn test_icann_names_are_not_eligible() {
        for host in [
            "example.com",
            "www.bbc.co.uk",
            "WWW.Example.COM.",
            "foo.dev",
            "example.berlin",
            "shop.nyc",
            "site.xn--p1ai",
            "a.london",
            "b.tokyo",
        ] {
            assert!(is_non_dnssec_host(host), "{host} should be skipped");
        }
    }

    #[test]
    fn test_handshake_names_are_eligible() {
        for host in ["welcome", "proofofconcept", "www.welcome", "nb.forever.", "Shakestation"] {
            assert!(is_dnssec_eligible(host), "{host} should be eligible");
        }
    }

    #[test]
    fn test_canonical_domain() {
        assert_eq!(canonical_domain("WWW.Welcome."), Some("www.welcome".into()));
        assert_eq!(canonical_domain("10.0.0.1"), None);
    }
}
