//! Root keypair loading

use anyhow::{Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

/// The root keypair: pays fees and signs for its roles
#[derive(Clone)]
pub struct RootSigner {
    keypair: Arc<Keypair>,
}

impl std::fmt::Debug for RootSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSigner")
            .field("pubkey", &self.keypair.pubkey())
            .finish()
    }
}

impl RootSigner {
    /// Load from a keypair file: the Solana CLI JSON array, or 64 raw bytes
    pub fn from_file(path: &str) -> Result<Self> {
        let resolved = expand_home(path);
        let raw = Zeroizing::new(
            std::fs::read(&resolved)
                .with_context(|| format!("Failed to read keypair file: {}", resolved.display()))?,
        );
        Self::from_bytes(&raw)
    }

    fn from_bytes(raw: &[u8]) -> Result<Self> {
        let secret: Zeroizing<Vec<u8>> = if raw.len() == 64 {
            Zeroizing::new(raw.to_vec())
        } else {
            Zeroizing::new(serde_json::from_slice(raw).context("Failed to parse keypair JSON")?)
        };

        if secret.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", secret.len());
        }
        if secret.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid keypair: all-zero key rejected");
        }
        let keypair = Keypair::try_from(secret.as_slice()).context("Invalid keypair bytes")?;

        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_json_keypair() {
        let keypair = Keypair::new();
        let mut file = NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let signer = RootSigner::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_load_raw_keypair() {
        let keypair = Keypair::new();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&keypair.to_bytes()).unwrap();

        let signer = RootSigner::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(signer.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(RootSigner::from_bytes(&[0u8; 64]).is_err());
        assert!(RootSigner::from_bytes(b"[1,2,3]").is_err());
        assert!(RootSigner::from_bytes(b"not json").is_err());
        assert!(RootSigner::from_file("/nonexistent/id.json").is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/id.json"), PathBuf::from("/tmp/id.json"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home("~/.config/solana/id.json"),
                PathBuf::from(home).join(".config/solana/id.json")
            );
        }
    }
}
