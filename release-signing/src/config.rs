// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Worker configuration. */

use {
    crate::error::{Result, SigningError},
    serde::{Deserialize, Deserializer, Serialize},
    std::path::{Path, PathBuf},
};

/// Configuration of the signing worker.
///
/// Every key is optional in the JSON form. Missing keys take the values from
/// [SigningConfig::default()].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Scratch directory. Task inputs live under `cot/<taskId>/` in here.
    pub work_dir: PathBuf,
    /// Directory signed outputs are staged into.
    pub artifact_dir: PathBuf,
    /// YAML file describing the signing server pool.
    pub signing_server_config: PathBuf,
    /// Address reported to legacy signing servers when requesting a token.
    pub my_ip: String,
    pub token_duration_seconds: u64,
    /// Certificate of the legacy signing servers.
    pub ssl_cert: Option<PathBuf>,
    /// Base command of the legacy signing client.
    #[serde(deserialize_with = "string_or_list")]
    pub signtool: Vec<String>,
    pub verbose: bool,
    pub zipalign: String,
    pub dmg: String,
    pub hfsplus: String,
    pub tar: String,
    /// MAR signature verification tool.
    pub mar: String,
    /// Directory holding the public keys used to verify MAR signatures.
    pub mar_verify_keys_dir: Option<PathBuf>,
    pub gpg_pubkey: Option<PathBuf>,
    pub widevine_cert: Option<PathBuf>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work_dir"),
            artifact_dir: PathBuf::from("artifact_dir"),
            signing_server_config: PathBuf::from("server_config.yaml"),
            my_ip: "127.0.0.1".to_string(),
            token_duration_seconds: 1200,
            ssl_cert: None,
            signtool: vec!["signtool".to_string()],
            verbose: true,
            zipalign: "zipalign".to_string(),
            dmg: "dmg".to_string(),
            hfsplus: "hfsplus".to_string(),
            tar: "tar".to_string(),
            mar: "mar".to_string(),
            mar_verify_keys_dir: None,
            gpg_pubkey: None,
            widevine_cert: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

fn string_or_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::String(s) => vec![s],
        StringOrList::List(l) => l,
    })
}

impl SigningConfig {
    /// Parse configuration from JSON data.
    pub fn from_json_slice(data: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(data)?;

        if config.signtool.is_empty() {
            return Err(SigningError::Config("signtool must not be empty".into()));
        }

        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let data = std::fs::read(path).map_err(|e| {
            SigningError::Config(format!("unable to read {}: {}", path.display(), e))
        })?;

        Self::from_json_slice(&data)
    }

    /// Path of the legacy signing token.
    pub fn token_path(&self) -> PathBuf {
        self.work_dir.join("token")
    }

    /// Path of the legacy signing nonce.
    pub fn nonce_path(&self) -> PathBuf {
        self.work_dir.join("nonce")
    }
}
