//! Identity discovery
//!
//! signal-cli keeps one entry per account in `<config>/data`:
//! - registered numbers are files named after the number (`+15551234567`)
//! - linked devices are extension-less JSON files whose `username` field
//!   holds the account
//!
//! Everything else (sub-directories, `*.d` folders, stray files) is skipped.
//! A skipped entry never aborts the run; only failing to list the directory
//! does.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::{ProvisionError, Result};

const PHONE_SIGIL: char = '+';
const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// How an identity was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    PhoneNumber,
    LinkedAccount,
}

/// An account accepted for provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Canonical account string passed to `signal-cli -u`
    pub value: String,
    pub source: IdentitySource,
    /// Directory entry the identity came from
    pub file_name: String,
}

/// Outcome of looking at a single directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accepted(IdentitySource, String),
    /// Looked like a linked-account file but had no usable username
    Skipped(String),
    /// Not an account file at all
    Rejected(String),
}

/// An entry that was looked at and not provisioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone)]
pub struct Discovery {
    pub accepted: Vec<Identity>,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Deserialize)]
struct LinkedAccountFile {
    #[serde(default)]
    username: Option<String>,
}

/// `+` followed by an E.164 number: 7 to 15 digits, no leading zero
pub fn is_phone_number(name: &str) -> bool {
    let Some(digits) = name.strip_prefix(PHONE_SIGIL) else {
        return false;
    };
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}

/// Content sniffing: a JSON object or array, optionally behind a BOM
pub fn looks_like_json(content: &[u8]) -> bool {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    let first = content.iter().find(|b| !b.is_ascii_whitespace());
    if !matches!(first, Some(b'{') | Some(b'[')) {
        return false;
    }
    serde_json::from_slice::<serde_json::Value>(content).is_ok()
}

fn has_extension(name: &str) -> bool {
    Path::new(name).extension().is_some()
}

fn username_from(content: &[u8]) -> std::result::Result<String, String> {
    let file: LinkedAccountFile =
        serde_json::from_slice(content).map_err(|e| format!("invalid account file: {}", e))?;
    match file.username {
        Some(username) if username.is_empty() => Err("username is empty".to_string()),
        // It ends up inside a supervisord INI line
        Some(username) if username.chars().any(char::is_control) => {
            Err(format!("username {:?} contains control characters", username))
        }
        Some(username) => Ok(username),
        None => Err("no username field".to_string()),
    }
}

/// Classify an entry by name, pulling its content only when the name alone
/// can't decide.
pub fn classify<F>(name: &str, read: F) -> Classification
where
    F: FnOnce() -> std::io::Result<Vec<u8>>,
{
    if is_phone_number(name) {
        return Classification::Accepted(IdentitySource::PhoneNumber, name.to_string());
    }

    if has_extension(name) {
        return Classification::Rejected(format!("{} is not a valid phone number", name));
    }

    let content = match read() {
        Ok(content) => content,
        Err(e) => {
            return Classification::Rejected(format!(
                "couldn't determine whether {} is a signal-cli config file: {}",
                name, e
            ))
        }
    };

    if !looks_like_json(&content) {
        return Classification::Rejected(format!(
            "{} is neither a valid phone number nor a linked account file",
            name
        ));
    }

    match username_from(&content) {
        Ok(username) => Classification::Accepted(IdentitySource::LinkedAccount, username),
        Err(reason) => Classification::Skipped(reason),
    }
}

/// Classify a file on disk
pub fn classify_path(path: &Path) -> Classification {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Classification::Rejected(format!("{:?} has no usable file name", path)),
    };
    classify(name, || fs::read(path))
}

/// List `data_dir` and return the accepted identities in file name order.
///
/// Sorting keeps ordinal assignment (and therefore ports) stable across
/// restarts no matter what order the filesystem lists entries in.
pub fn discover(data_dir: &Path) -> Result<Discovery> {
    let list_err = |source| ProvisionError::ListDataDir {
        path: data_dir.to_path_buf(),
        source,
    };

    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(data_dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        let path = entry.path();
        // Follows symlinks, so a linked directory is skipped too
        if path.is_dir() {
            continue;
        }
        entries.push((entry.file_name().to_string_lossy().into_owned(), path));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut discovery = Discovery::default();
    for (file_name, path) in entries {
        match classify_path(&path) {
            Classification::Accepted(source, value) => {
                debug!(file = %file_name, identity = %value, ?source, "Accepted account entry");
                discovery.accepted.push(Identity {
                    value,
                    source,
                    file_name,
                });
            }
            Classification::Skipped(reason) => {
                debug!(file = %file_name, %reason, "Skipping entry, not a valid signal-cli config file");
                discovery.skipped.push(SkippedEntry { file_name, reason });
            }
            Classification::Rejected(reason) => {
                error!(file = %file_name, %reason, "Skipping entry");
                discovery.skipped.push(SkippedEntry { file_name, reason });
            }
        }
    }

    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unread() -> std::io::Result<Vec<u8>> {
        panic!("content should not be read")
    }

    fn content(body: &'static str) -> impl FnOnce() -> std::io::Result<Vec<u8>> {
        move || Ok(body.as_bytes().to_vec())
    }

    #[test]
    fn test_phone_numbers() {
        assert!(is_phone_number("+15551234567"));
        assert!(is_phone_number("+4915112345678"));
        assert!(!is_phone_number("15551234567"));
        assert!(!is_phone_number("+0551234567"));
        assert!(!is_phone_number("+1555"));
        assert!(!is_phone_number("+1555123456789012"));
        assert!(!is_phone_number("+1555abc4567"));
        assert!(!is_phone_number("+15551234567.d"));
        assert!(!is_phone_number("+"));
    }

    #[test]
    fn test_phone_number_file_is_accepted_by_name() {
        assert_eq!(
            classify("+15551234567", unread),
            Classification::Accepted(IdentitySource::PhoneNumber, "+15551234567".to_string())
        );
    }

    #[test]
    fn test_file_with_extension_is_rejected() {
        assert!(matches!(classify("alice.txt", unread), Classification::Rejected(_)));
        assert!(matches!(classify("accounts.json", unread), Classification::Rejected(_)));
    }

    #[test]
    fn test_linked_account_file() {
        assert_eq!(
            classify("a1b2c3", content(r#"{"username":"bob"}"#)),
            Classification::Accepted(IdentitySource::LinkedAccount, "bob".to_string())
        );
    }

    #[test]
    fn test_linked_account_with_extra_fields() {
        let body = r#"
            {
              "username": "+15557654321",
              "deviceId": 2,
              "registered": true
            }"#;
        assert_eq!(
            classify("123456", content(body)),
            Classification::Accepted(IdentitySource::LinkedAccount, "+15557654321".to_string())
        );
    }

    #[test]
    fn test_json_without_username_is_skipped() {
        assert!(matches!(classify("a1b2c3", content("{}")), Classification::Skipped(_)));
        assert!(matches!(
            classify("a1b2c3", content(r#"{"username":""}"#)),
            Classification::Skipped(_)
        ));
        assert!(matches!(
            classify("a1b2c3", content(r#"{"username":"bob\nuser=root"}"#)),
            Classification::Skipped(_)
        ));
        // Valid JSON, wrong shape
        assert!(matches!(classify("a1b2c3", content("[1, 2]")), Classification::Skipped(_)));
    }

    #[test]
    fn test_username_is_taken_verbatim() {
        assert_eq!(
            classify("a1b2c3", content(r#"{"username":"  "}"#)),
            Classification::Accepted(IdentitySource::LinkedAccount, "  ".to_string())
        );
        assert_eq!(
            classify("a1b2c3", content(r#"{"username":"a\"b"}"#)),
            Classification::Accepted(IdentitySource::LinkedAccount, r#"a"b"#.to_string())
        );
    }

    #[test]
    fn test_non_json_extensionless_file_is_rejected() {
        assert!(matches!(
            classify("notes", content("just some text")),
            Classification::Rejected(_)
        ));
        assert!(matches!(classify("empty", content("")), Classification::Rejected(_)));
        assert!(matches!(
            classify("truncated", content(r#"{"username": "bo"#)),
            Classification::Rejected(_)
        ));
    }

    #[test]
    fn test_read_error_is_rejected() {
        let failing = || Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(classify("locked", failing), Classification::Rejected(_)));
    }

    #[test]
    fn test_sigil_without_valid_number_is_rejected() {
        assert!(matches!(
            classify("+notanumber", content("plain")),
            Classification::Rejected(_)
        ));
    }

    #[test]
    fn test_looks_like_json_with_bom() {
        assert!(looks_like_json(b"\xEF\xBB\xBF  {\"username\":\"x\"}"));
        assert!(!looks_like_json(b"\"a string\""));
        assert!(!looks_like_json(b"42"));
    }
}
