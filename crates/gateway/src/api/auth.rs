//! API key authentication.
//!
//! Keys never exist in the config in the clear — only their SHA-256
//! hashes. Validation hashes the presented key and compares digests in
//! constant time. Each key carries a mud name, method-tag permissions,
//! and optional IP allow/deny patterns (`"10.0.*"` style prefixes).

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use i3_domain::config::ApiKeyConfig;
use i3_domain::{Error, Result};

/// Everything a validated key grants.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub mud_name: String,
    /// Short fingerprint of the key hash, for logs and session records.
    pub key_id: String,
    pub permissions: HashSet<String>,
}

struct KeyEntry {
    hash: Vec<u8>,
    config: ApiKeyConfig,
}

pub struct KeyRing {
    keys: Vec<KeyEntry>,
}

impl KeyRing {
    pub fn new(configs: &[ApiKeyConfig]) -> Self {
        let keys = configs
            .iter()
            .filter_map(|config| match hex_decode(&config.key_hash) {
                Some(hash) => Some(KeyEntry {
                    hash,
                    config: config.clone(),
                }),
                None => {
                    tracing::warn!(mud_name = %config.mud_name, "skipping key with bad hash");
                    None
                }
            })
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Validate a raw key presented by a client at `remote_ip`.
    pub fn authenticate(&self, raw_key: &str, remote_ip: Option<&str>) -> Result<AuthGrant> {
        let digest = Sha256::digest(raw_key.as_bytes());
        for entry in &self.keys {
            // Hashing normalizes lengths so ct_eq always compares 32 bytes.
            if digest.ct_eq(entry.hash.as_slice()).into() {
                if !ip_allowed(&entry.config, remote_ip) {
                    tracing::warn!(
                        mud_name = %entry.config.mud_name,
                        ip = remote_ip.unwrap_or("unknown"),
                        "key valid but IP rejected"
                    );
                    return Err(Error::PermissionDenied("source address not allowed".into()));
                }
                return Ok(AuthGrant {
                    mud_name: entry.config.mud_name.clone(),
                    key_id: entry.config.key_hash[..8].to_string(),
                    permissions: entry.config.permissions.iter().cloned().collect(),
                });
            }
        }
        Err(Error::NotAuthenticated)
    }
}

fn ip_allowed(config: &ApiKeyConfig, remote_ip: Option<&str>) -> bool {
    let Some(ip) = remote_ip else {
        // No address (unit tests, unix sockets): only deny-less keys pass.
        return config.deny_ips.is_empty();
    };
    if config.deny_ips.iter().any(|pattern| ip_match(pattern, ip)) {
        return false;
    }
    if config.allow_ips.is_empty() {
        return true;
    }
    config.allow_ips.iter().any(|pattern| ip_match(pattern, ip))
}

/// Exact match, or prefix match when the pattern ends with `*`.
fn ip_match(pattern: &str, ip: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => ip.starts_with(prefix),
        None => pattern == ip,
    }
}

/// Hash a raw key the way the config stores it.
pub fn hash_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() != 64 {
        return None;
    }
    hex::decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_config(raw: &str, mud: &str) -> ApiKeyConfig {
        ApiKeyConfig {
            key_hash: hash_key(raw),
            mud_name: mud.into(),
            permissions: vec!["*".into()],
            allow_ips: vec![],
            deny_ips: vec![],
        }
    }

    #[test]
    fn valid_key_grants_identity() {
        let ring = KeyRing::new(&[key_config("K1", "LuminariMUD")]);
        let grant = ring.authenticate("K1", Some("127.0.0.1")).unwrap();
        assert_eq!(grant.mud_name, "LuminariMUD");
        assert_eq!(grant.key_id.len(), 8);
        assert!(grant.permissions.contains("*"));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let ring = KeyRing::new(&[key_config("K1", "M")]);
        assert!(matches!(
            ring.authenticate("K2", Some("127.0.0.1")),
            Err(Error::NotAuthenticated)
        ));
    }

    #[test]
    fn deny_list_beats_allow_list() {
        let mut config = key_config("K1", "M");
        config.allow_ips = vec!["10.0.*".into()];
        config.deny_ips = vec!["10.0.0.66".into()];
        let ring = KeyRing::new(&[config]);

        assert!(ring.authenticate("K1", Some("10.0.0.1")).is_ok());
        assert!(matches!(
            ring.authenticate("K1", Some("10.0.0.66")),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            ring.authenticate("K1", Some("192.168.1.1")),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn bad_hash_entries_are_skipped() {
        let ring = KeyRing::new(&[ApiKeyConfig {
            key_hash: "nothex".into(),
            mud_name: "M".into(),
            permissions: vec!["*".into()],
            allow_ips: vec![],
            deny_ips: vec![],
        }]);
        assert!(ring.is_empty());
    }

    #[test]
    fn hash_key_matches_fixture() {
        // sha256("K1")
        assert_eq!(
            hash_key("K1"),
            "badb7283766a112aebdb2936077a25f5db85ea465cdbac330ba6641d38c4ac77"
        );
    }
}
