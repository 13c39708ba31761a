use std::fmt::{Display, Formatter};
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use idna::AsciiDenyList;

/// Longest presentation-format name (without the trailing dot) that fits the
/// 255-octet wire limit.
pub const MAX_NAME_LEN: usize = 253;

/// Longest single label.
pub const MAX_LABEL_LEN: usize = 63;

/// A validated, lower-cased domain name without the trailing dot.
///
/// The root is represented as `"."`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DomainName(Arc<str>);

impl DomainName {
    /// The root name.
    pub fn root() -> Self {
        Self(Arc::from("."))
    }

    /// Create a name from ASCII presentation format, enforcing RFC 1035 length limits.
    ///
    /// Unicode input must go through [`DomainName::from_user`] instead.
    pub fn from_ascii(s: impl AsRef<str>) -> anyhow::Result<Self> {
        let s = s.as_ref().trim();

        if s == "." || s.is_empty() {
            return Ok(Self::root());
        }

        let s = s.strip_suffix('.').unwrap_or(s);

        anyhow::ensure!(s.len() <= MAX_NAME_LEN, "domain name too long ({} bytes)", s.len());

        for label in s.split('.') {
            anyhow::ensure!(!label.is_empty(), "empty label in domain name: {}", s);
            anyhow::ensure!(label.len() <= MAX_LABEL_LEN, "domain label too long: {}", label);
        }

        Ok(Self(Arc::from(s.to_ascii_lowercase())))
    }

    /// Create a name from user input, converting IDNs to their ASCII form.
    pub fn from_user(s: impl AsRef<str>) -> anyhow::Result<Self> {
        let input = s.as_ref().trim();

        if input == "." {
            return Ok(Self::root());
        }

        let name = input.strip_suffix('.').unwrap_or(input);

        let ascii = idna::domain_to_ascii_cow(name.as_bytes(), AsciiDenyList::URL)
            .map_err(|_| anyhow::anyhow!("invalid IDNA domain: {}", input))?;

        Self::from_ascii(&ascii)
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "."
    }

    /// Number of labels, zero for the root.
    pub fn label_count(&self) -> usize {
        if self.is_root() { 0 } else { self.0.split('.').count() }
    }

    /// Labels from left to right.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|l| !l.is_empty() && *l != ".")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for DomainName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_name_creation() {
        let dn = DomainName::from_ascii("Example.com.").unwrap();
        assert_eq!(dn.as_str(), "example.com");
        assert_eq!(dn.label_count(), 2);

        let dn2 = DomainName::from_ascii("sub.domain.example.com").unwrap();
        assert_eq!(dn2.labels().collect::<Vec<_>>(), vec!["sub", "domain", "example", "com"]);

        assert!(DomainName::from_ascii("label..example.com").is_err());
        assert!(DomainName::from_ascii("a".repeat(64) + ".com").is_err());
    }

    #[test]
    fn test_name_length_limit() {
        // 63 + 1 + 63 + 1 + 63 + 1 + 61 = 253
        let ok = format!("{}.{}.{}.{}", "a".repeat(63), "b".repeat(63), "c".repeat(63), "d".repeat(61));
        assert_eq!(ok.len(), 253);
        assert!(DomainName::from_ascii(&ok).is_ok());

        let too_long = format!("{}.{}.{}.{}", "a".repeat(63), "b".repeat(63), "c".repeat(63), "d".repeat(62));
        assert!(DomainName::from_ascii(&too_long).is_err());
    }

    #[test]
    fn test_root() {
        assert!(DomainName::from_ascii(".").unwrap().is_root());
        assert_eq!(DomainName::root().label_count(), 0);
    }

    #[test]
    fn test_from_user_idna() {
        let dn = DomainName::from_user("bücher.example").unwrap();
        assert_eq!(dn.as_str(), "xn--bcher-kva.example");
    }
}
