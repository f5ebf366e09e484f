//! Wallet manifest
//!
//! A TOML file describing wallets and their roles, served through
//! [`WalletStateProvider`]. Example:
//!
//! ```toml
//! [[wallets]]
//! address = "7xKX..."
//!
//! [[wallets.roles]]
//! id = 0
//! signer = "9WzD..."
//! permissions = [{ kind = "all" }]
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use super::{AuthorityError, Role, WalletState, WalletStateProvider};

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    wallets: Vec<WalletEntry>,
}

#[derive(Debug, Deserialize)]
struct WalletEntry {
    address: String,
    #[serde(default)]
    program_id: Option<String>,
    #[serde(default)]
    roles: Vec<Role>,
}

/// Wallet state provider backed by a manifest file
#[derive(Debug, Clone, Default)]
pub struct ManifestWalletProvider {
    wallets: HashMap<Pubkey, WalletState>,
}

impl ManifestWalletProvider {
    /// Load from a TOML file; wallets without a program id use `default_program`
    pub fn from_file<P: AsRef<Path>>(path: P, default_program: Pubkey) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read wallet manifest {}", path.display()))?;
        Self::from_toml(&content, default_program)
            .with_context(|| format!("Invalid wallet manifest {}", path.display()))
    }

    pub fn from_toml(content: &str, default_program: Pubkey) -> Result<Self> {
        let file: ManifestFile = toml::from_str(content)?;
        let mut wallets = HashMap::with_capacity(file.wallets.len());

        for entry in file.wallets {
            let address = Pubkey::from_str(&entry.address)
                .map_err(|e| anyhow!("wallet address {}: {}", entry.address, e))?;
            let program_id = match entry.program_id {
                Some(id) => Pubkey::from_str(&id).map_err(|e| anyhow!("program id {}: {}", id, e))?,
                None => default_program,
            };

            let mut seen = std::collections::HashSet::new();
            for role in &entry.roles {
                if !seen.insert(role.id) {
                    return Err(anyhow!("wallet {} declares role {} twice", address, role.id));
                }
            }

            let state = WalletState {
                address,
                program_id,
                roles: entry.roles,
            };
            if wallets.insert(address, state).is_some() {
                return Err(anyhow!("wallet {} declared twice", address));
            }
        }

        Ok(Self { wallets })
    }

    pub fn with_wallet(mut self, state: WalletState) -> Self {
        self.wallets.insert(state.address, state);
        self
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[async_trait]
impl WalletStateProvider for ManifestWalletProvider {
    async fn fetch_wallet(&self, address: &Pubkey) -> Result<WalletState, AuthorityError> {
        self.wallets
            .get(address)
            .cloned()
            .ok_or(AuthorityError::WalletNotFound(*address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{Permission, DEFAULT_WALLET_PROGRAM_ID};
    use std::io::Write;

    fn manifest(wallet: &Pubkey, signer: &Pubkey, program: &Pubkey) -> String {
        format!(
            r#"
[[wallets]]
address = "{wallet}"

[[wallets.roles]]
id = 0
signer = "{signer}"
permissions = [{{ kind = "all" }}]

[[wallets.roles]]
id = 1
signer = "{signer}"
permissions = [
    {{ kind = "program_limit", program_id = "{program}" }},
    {{ kind = "sol_limit", lamports = 5000 }},
]
"#
        )
    }

    #[tokio::test]
    async fn test_load_manifest_from_file() {
        let wallet = Pubkey::new_unique();
        let signer = Pubkey::new_unique();
        let program = Pubkey::new_unique();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(manifest(&wallet, &signer, &program).as_bytes()).unwrap();

        let provider =
            ManifestWalletProvider::from_file(file.path(), DEFAULT_WALLET_PROGRAM_ID).unwrap();
        assert_eq!(provider.len(), 1);

        let state = provider.fetch_wallet(&wallet).await.unwrap();
        assert_eq!(state.program_id, DEFAULT_WALLET_PROGRAM_ID);
        assert_eq!(state.find_role_by_signer(&signer).unwrap().id, 0);
        assert_eq!(
            state.role(1).unwrap().permissions,
            vec![
                Permission::ProgramLimit { program_id: program },
                Permission::SolLimit { lamports: 5000 },
            ]
        );

        assert!(matches!(
            provider.fetch_wallet(&Pubkey::new_unique()).await,
            Err(AuthorityError::WalletNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_role_rejected() {
        let wallet = Pubkey::new_unique();
        let signer = Pubkey::new_unique();
        let text = format!(
            "[[wallets]]\naddress = \"{wallet}\"\n[[wallets.roles]]\nid = 0\nsigner = \"{signer}\"\n[[wallets.roles]]\nid = 0\nsigner = \"{signer}\"\n"
        );
        assert!(ManifestWalletProvider::from_toml(&text, DEFAULT_WALLET_PROGRAM_ID).is_err());
    }

    #[test]
    fn test_bad_address_rejected() {
        let text = "[[wallets]]\naddress = \"nope\"\n";
        assert!(ManifestWalletProvider::from_toml(text, DEFAULT_WALLET_PROGRAM_ID).is_err());
    }
}
