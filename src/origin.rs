use serde::{Deserialize, Serialize};

/// The protected request as seen by the edge proxy: protocol, host and path.
///
/// Pure value type. The canonical form is the lowercase concatenation
/// `protocol://host + path` and all comparisons run over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginUrl {
    protocol: String,
    host: String,
    path: String,
}

impl OriginUrl {
    pub fn new(protocol: &str, host: &str, path: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            path: path.to_string(),
        }
    }

    /// Lowercase `protocol://host + path`.
    pub fn canonical(&self) -> String {
        format!("{}://{}{}", self.protocol, self.host, self.path).to_lowercase()
    }

    /// Case-insensitive prefix test against the canonical form.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.canonical().starts_with(&prefix.to_lowercase())
    }

    /// Percent-encodes the whole canonical string, scheme and slashes
    /// included, into one opaque token (form-urlencoding rules).
    ///
    /// Existing IdP-side redirect configuration expects exactly this
    /// encoding, so it must stay byte-for-byte stable.
    pub fn redirect_target(&self) -> String {
        url::form_urlencoded::byte_serialize(self.canonical().as_bytes()).collect()
    }
}

impl std::fmt::Display for OriginUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_lowercase_and_stable() {
        let origin = OriginUrl::new("HTTPS", "Example.COM", "/Some/Path");
        assert_eq!(origin.canonical(), "https://example.com/some/path");
        assert_eq!(origin.canonical(), origin.canonical());
    }

    #[test]
    fn starts_with_is_case_insensitive() {
        let origin = OriginUrl::new("https", "example.com", "/signin?code=1");
        assert!(origin.starts_with("HTTPS://EXAMPLE.COM/SIGNIN"));
        assert!(origin.starts_with("https://example.com/"));
        assert!(!origin.starts_with("https://other.example.com"));
    }

    #[test]
    fn redirect_target_encodes_the_entire_url() {
        let origin = OriginUrl::new("https", "example.com", "/path?x=1");
        assert_eq!(
            origin.redirect_target(),
            "https%3A%2F%2Fexample.com%2Fpath%3Fx%3D1"
        );
    }

    #[test]
    fn redirect_target_uses_form_encoding_for_spaces() {
        let origin = OriginUrl::new("https", "example.com", "/a b");
        assert_eq!(origin.redirect_target(), "https%3A%2F%2Fexample.com%2Fa+b");
    }
}
