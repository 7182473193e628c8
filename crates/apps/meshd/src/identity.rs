//! The excluded identity-bootstrap component stands in here as a small JSON
//! file: a stable mesh id and display name, minted once and reused across
//! restarts. No key material, no cryptographic identity — just the two
//! fields the router needs to originate packets.

use std::fs;
use std::path::Path;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub mesh_id: String,
    pub display_name: String,
}

impl Identity {
    /// Loads the identity at `path`, minting and persisting a fresh one if
    /// the file doesn't exist yet.
    pub fn load_or_create(path: &Path, default_display_name: &str) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate(default_display_name);
                identity.save(path)?;
                Ok(identity)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn generate(display_name: &str) -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        Self { mesh_id: hex::encode(bytes), display_name: display_name.to_string() }
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_identity_persists_across_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("identity.json");

        let first = Identity::load_or_create(&path, "Node").expect("mint");
        let second = Identity::load_or_create(&path, "Node").expect("reload");
        assert_eq!(first.mesh_id, second.mesh_id);
    }

    #[test]
    fn mesh_id_is_16_hex_chars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("identity.json");
        let identity = Identity::load_or_create(&path, "Node").expect("mint");
        assert_eq!(identity.mesh_id.len(), 16);
    }
}
