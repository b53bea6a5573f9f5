//! SMTP extension table.

use std::collections::HashMap;

/// Well-known extension keywords.
pub mod keyword {
    /// STARTTLS - TLS upgrade
    pub const STARTTLS: &str = "STARTTLS";
    /// AUTH - Authentication
    pub const AUTH: &str = "AUTH";
    /// PIPELINING - Command pipelining
    pub const PIPELINING: &str = "PIPELINING";
    /// 8BITMIME - 8-bit MIME transport
    pub const EIGHT_BIT_MIME: &str = "8BITMIME";
    /// SIZE - Maximum message size
    pub const SIZE: &str = "SIZE";
}

/// Extensions advertised in an EHLO reply.
///
/// Keywords are stored exactly as the server advertised them; lookups are
/// case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    table: HashMap<String, String>,
}

impl Extensions {
    /// Creates an empty table (HELO sessions).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from EHLO reply lines.
    ///
    /// The first line is the server's greeting and is skipped. Every other
    /// line is split on its first space into keyword and parameters.
    #[must_use]
    pub fn from_ehlo<S: AsRef<str>>(lines: &[S]) -> Self {
        let table = lines
            .iter()
            .skip(1)
            .map(|line| {
                let line = line.as_ref();
                match line.split_once(' ') {
                    Some((name, params)) => (name.to_string(), params.to_string()),
                    None => (line.to_string(), String::new()),
                }
            })
            .collect();
        Self { table }
    }

    /// Returns true if the extension is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Returns the parameter string of an extension.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.table.get(name).map(String::as_str)
    }

    /// Removes an extension, returning its parameters if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.table.remove(name)
    }

    /// Returns the SASL mechanisms listed in the `AUTH` extension.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.get(keyword::AUTH)
            .map(|params| params.split(' ').map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Returns the number of advertised extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if no extensions are advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Iterates over `(keyword, parameters)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn parse_ehlo_lines() {
        let ext = Extensions::from_ehlo(&["mail.example.com", "PIPELINING", "AUTH PLAIN LOGIN"]);

        assert_eq!(ext.len(), 2);
        assert_eq!(ext.get("PIPELINING"), Some(""));
        assert_eq!(ext.get("AUTH"), Some("PLAIN LOGIN"));
        assert_eq!(ext.auth_mechanisms(), vec!["PLAIN", "LOGIN"]);
    }

    #[test]
    fn greeting_line_is_not_an_extension() {
        let ext = Extensions::from_ehlo(&["mail.example.com Hello"]);
        assert!(ext.is_empty());
        assert!(!ext.contains("mail.example.com"));
    }

    #[test]
    fn keywords_are_case_sensitive() {
        let ext = Extensions::from_ehlo(&["mx", "starttls"]);
        assert!(ext.contains("starttls"));
        assert!(!ext.contains(keyword::STARTTLS));
    }

    #[test]
    fn parameters_split_on_first_space_only() {
        let ext = Extensions::from_ehlo(&["mx", "SIZE 52428800", "X-CUSTOM a b c"]);
        assert_eq!(ext.get(keyword::SIZE), Some("52428800"));
        assert_eq!(ext.get("X-CUSTOM"), Some("a b c"));
    }

    #[test]
    fn remove_extension() {
        let mut ext = Extensions::from_ehlo(&["mx", "PIPELINING", "8BITMIME"]);
        assert_eq!(ext.remove(keyword::PIPELINING), Some(String::new()));
        assert!(!ext.contains(keyword::PIPELINING));
        assert!(ext.contains(keyword::EIGHT_BIT_MIME));
        assert_eq!(ext.remove(keyword::PIPELINING), None);
    }

    #[test]
    fn no_auth_means_no_mechanisms() {
        let ext = Extensions::from_ehlo(&["mx", "PIPELINING"]);
        assert!(ext.auth_mechanisms().is_empty());
    }
}
