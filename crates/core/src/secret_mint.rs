//! Mints per-deployment random secrets bound to manifest-declared names.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::error::AgentError;

const TOKEN_ENTROPY_BYTES: usize = 16;

pub struct SecretMint;

impl SecretMint {
    /// Mint one opaque, URL-safe token per name. Tokens are never persisted;
    /// they live only in memory and in the env of the containers created
    /// from them. `names` coming from `manifest.dynamic_secrets` may contain
    /// duplicates (it's a YAML list, not a set) — that's a manifest error.
    pub fn mint(names: &[String]) -> Result<BTreeMap<String, String>, AgentError> {
        let mut minted = BTreeMap::new();
        for name in names {
            if minted.contains_key(name) {
                return Err(AgentError::ManifestError(format!(
                    "duplicate secret name '{name}'"
                )));
            }
            minted.insert(name.clone(), Self::random_token());
        }
        Ok(minted)
    }

    fn random_token() -> String {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}
