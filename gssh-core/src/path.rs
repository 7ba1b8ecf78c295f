//! Identity path → sub-record key mapping.
//!
//! An identity `P` owns up to three records in the store:
//!
//! ```text
//! P/password      passphrase protecting the private key
//! P/ssh-key       base64 private key (PEM / OpenSSH container)
//! P/ssh-key.pub   base64 authorized_keys line
//! ```

use std::collections::HashSet;

pub const SUFFIX_PASSWORD: &str = "password";
pub const SUFFIX_PRIVATE_KEY: &str = "ssh-key";
pub const SUFFIX_PUBLIC_KEY: &str = "ssh-key.pub";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("ssh-key path must be set")]
    Empty,
    #[error("path segment '..' is not allowed in '{0}'")]
    Traversal(String),
}

/// Join the store prefix and a user-supplied path into an identity key.
///
/// Empty and `.` segments are dropped; `..` is rejected.  The user path
/// must name at least one segment.
pub fn identity_key(store: &str, path: &str) -> Result<String, PathError> {
    let user: Vec<&str> = segments(path)?;
    if user.is_empty() {
        return Err(PathError::Empty);
    }
    let mut all = segments(store)?;
    all.extend(user);
    Ok(all.join("/"))
}

fn segments(raw: &str) -> Result<Vec<&str>, PathError> {
    let mut out = Vec::new();
    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => return Err(PathError::Traversal(raw.to_string())),
            s => out.push(s),
        }
    }
    Ok(out)
}

fn join(identity: &str, suffix: &str) -> String {
    format!("{}/{suffix}", identity.trim_end_matches('/'))
}

pub fn password_key(identity: &str) -> String {
    join(identity, SUFFIX_PASSWORD)
}

pub fn private_key_key(identity: &str) -> String {
    join(identity, SUFFIX_PRIVATE_KEY)
}

pub fn public_key_key(identity: &str) -> String {
    join(identity, SUFFIX_PUBLIC_KEY)
}

/// Distinct identity paths below `prefix`, relative to it, in first-seen order.
///
/// Each stored key contributes its parent directory, so
/// `ssh-keys/team/host/password` under `ssh-keys` yields `team/host`.
/// Keys directly under `prefix` have no identity and are skipped.
pub fn list_children(keys: &[String], prefix: &str) -> Vec<String> {
    let prefix = prefix.trim_end_matches('/');
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for key in keys {
        let Some(rel) = key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            continue;
        };
        let Some((dir, _leaf)) = rel.rsplit_once('/') else {
            continue;
        };
        if seen.insert(dir) {
            out.push(dir.to_string());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_record_keys() {
        assert_eq!(password_key("ssh-keys/team/host"), "ssh-keys/team/host/password");
        assert_eq!(private_key_key("ssh-keys/team/host"), "ssh-keys/team/host/ssh-key");
        assert_eq!(public_key_key("ssh-keys/team/host/"), "ssh-keys/team/host/ssh-key.pub");
    }

    #[test]
    fn identity_key_joins_and_cleans() {
        assert_eq!(identity_key("ssh-keys", "team/host").unwrap(), "ssh-keys/team/host");
        assert_eq!(identity_key("ssh-keys/", "/team//./host/").unwrap(), "ssh-keys/team/host");
        assert_eq!(identity_key("", "host").unwrap(), "host");
    }

    #[test]
    fn identity_key_rejects_empty_and_traversal() {
        assert_eq!(identity_key("ssh-keys", ""), Err(PathError::Empty));
        assert_eq!(identity_key("ssh-keys", "/./"), Err(PathError::Empty));
        assert!(matches!(
            identity_key("ssh-keys", "team/../other"),
            Err(PathError::Traversal(_))
        ));
    }

    #[test]
    fn list_children_dedupes_in_order() {
        let keys: Vec<String> = [
            "ssh-keys/b/host/password",
            "ssh-keys/b/host/ssh-key",
            "ssh-keys/a/password",
            "ssh-keys/b/host/ssh-key.pub",
            "other/c/password",
            "ssh-keys-old/d/password",
            "ssh-keys/loose",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(list_children(&keys, "ssh-keys"), vec!["b/host", "a"]);
    }

    #[test]
    fn list_children_empty_store() {
        assert!(list_children(&[], "ssh-keys").is_empty());
    }
}
