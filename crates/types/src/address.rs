use std::fmt;

/// A case-insensitive mail-style calendar user address, as carried on
/// `ORGANIZER`/`ATTENDEE` properties (spec §3, `CalAddress`).
///
/// Normalization strips a leading `mailto:` and lower-cases the whole
/// address; per spec §4.1 the local-part is always compared
/// case-insensitively, and within the deployment's configured local domains
/// the domain is too (mail domains are conventionally case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CalAddress(String);

impl CalAddress {
    pub fn parse(raw: &str) -> Option<Self> {
        let addr = raw.trim().trim_start_matches("mailto:").trim();
        if addr.is_empty() || !addr.contains('@') {
            return None;
        }
        Some(Self(addr.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or_default()
    }

    pub fn domain(&self) -> &str {
        self.0.split('@').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for CalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mailto:{}", self.0)
    }
}

impl AsRef<str> for CalAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_mailto_and_lowercases() {
        let a = CalAddress::parse("MAILTO:Bob@X.Test").unwrap();
        assert_eq!(a.as_str(), "bob@x.test");
        assert_eq!(a.local_part(), "bob");
        assert_eq!(a.domain(), "x.test");
    }

    #[test]
    fn rejects_addresses_without_at() {
        assert!(CalAddress::parse("not-an-address").is_none());
    }

    #[test]
    fn equality_is_case_insensitive_after_parse() {
        let a = CalAddress::parse("Bob@X.Test").unwrap();
        let b = CalAddress::parse("bob@x.test").unwrap();
        assert_eq!(a, b);
    }
}
