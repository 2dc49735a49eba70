//! Admin credentials known to the supervisor, and extraction from server output.
//!
//! The password is only ever held in memory.

use crate::config::SupervisorDefaults;
use regex::Regex;
use std::sync::LazyLock;

/// Startup banner printed by a server on its first run.
static STARTUP_PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"initial password is:\s*(\S+)").expect("startup password regex must compile")
});

/// Output of `admin show`.
static SHOWN_PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:password|password is):\s*(\S+)")
        .expect("shown password regex must compile")
});

/// Extract the password from a startup log line (case-sensitive).
pub fn extract_startup_password(line: &str) -> Option<String> {
    STARTUP_PASSWORD
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract the password from `admin show` output (case-insensitive).
///
/// Expects ANSI escapes to be stripped already.
pub fn extract_shown_password(text: &str) -> Option<String> {
    SHOWN_PASSWORD
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// A username/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    /// Unknown until captured or set.
    pub password: Option<String>,
}

/// In-memory holder of the last known admin credential.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    credential: Credential,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            credential: Credential {
                username: SupervisorDefaults::DEFAULT_USERNAME.to_string(),
                password: None,
            },
        }
    }

    /// Replace the stored password. The value is opaque.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.credential.password = Some(password.into());
    }

    pub fn username(&self) -> &str {
        &self.credential.username
    }

    pub fn password(&self) -> Option<&str> {
        self.credential.password.as_deref()
    }

    pub fn has_password(&self) -> bool {
        self.credential.password.is_some()
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_password_exact_token() {
        let line = "INFO[0000] Successfully created the admin user and the initial password is: Ab12Xy99 (keep it)";
        assert_eq!(extract_startup_password(line).as_deref(), Some("Ab12Xy99"));
    }

    #[test]
    fn test_startup_password_is_case_sensitive() {
        assert_eq!(extract_startup_password("Initial Password Is: Ab12Xy99"), None);
        assert_eq!(extract_startup_password("start server @ 0.0.0.0:5244"), None);
    }

    #[test]
    fn test_shown_password_variants() {
        assert_eq!(
            extract_shown_password("INFO admin user's password: s3cret!\n").as_deref(),
            Some("s3cret!")
        );
        assert_eq!(
            extract_shown_password("PASSWORD:   Zz9").as_deref(),
            Some("Zz9")
        );
        assert_eq!(extract_shown_password("username: admin\n"), None);
    }

    #[test]
    fn test_store_defaults_and_updates() {
        let mut store = CredentialStore::new();
        assert_eq!(store.username(), "admin");
        assert_eq!(store.password(), None);

        store.set_password("Ab12Xy99");
        assert_eq!(store.password(), Some("Ab12Xy99"));
        assert_eq!(store.credential().username, "admin");
    }

    #[test]
    fn test_no_match_leaves_store_unchanged() {
        let mut store = CredentialStore::new();
        store.set_password("before");

        if let Some(password) = extract_startup_password("nothing interesting here") {
            store.set_password(password);
        }
        assert_eq!(store.password(), Some("before"));
    }
}
