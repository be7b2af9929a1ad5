// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing server pool. */

use {
    crate::error::{Result, SigningError},
    log::info,
    serde::Deserialize,
    std::path::Path,
};

/// Protocol a signing server speaks.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    /// Legacy signing server driven by the external signtool client.
    Signtool,
    /// Autograph HTTP service.
    Autograph,
}

/// A signing server and the credentials to talk to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningServer {
    pub server: String,
    pub user: String,
    pub password: String,
    pub formats: Vec<String>,
    pub server_type: ServerType,
}

impl SigningServer {
    /// Whether this server can sign any of the given formats.
    pub fn supports_any<S: AsRef<str>>(&self, formats: &[S]) -> bool {
        formats
            .iter()
            .any(|f| self.formats.iter().any(|x| x == f.as_ref()))
    }
}

#[derive(Deserialize)]
struct PoolConfig {
    urls: Vec<String>,
    user: String,
    pass: String,
    formats: Vec<String>,
    #[serde(rename = "server-type")]
    server_type: ServerType,
}

/// Signing servers grouped by cert type, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct ServerPool {
    cert_types: Vec<(String, Vec<SigningServer>)>,
}

impl ServerPool {
    /// Parse a pool from its YAML definition.
    ///
    /// The document maps cert types to named pools. Each pool lists the
    /// server URLs sharing one set of credentials and formats.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let raw: serde_yaml::Mapping = serde_yaml::from_str(data)?;

        let mut cert_types = vec![];

        for (cert_type, pools) in raw {
            let cert_type = cert_type
                .as_str()
                .ok_or_else(|| SigningError::Config("cert type keys must be strings".into()))?
                .to_string();

            let pools: serde_yaml::Mapping = serde_yaml::from_value(pools)?;
            let mut servers = vec![];

            for (_, pool) in pools {
                let pool: PoolConfig = serde_yaml::from_value(pool)?;

                servers.extend(pool.urls.iter().map(|url| SigningServer {
                    server: url.clone(),
                    user: pool.user.clone(),
                    password: pool.pass.clone(),
                    formats: pool.formats.clone(),
                    server_type: pool.server_type,
                }));
            }

            cert_types.push((cert_type, servers));
        }

        Ok(Self { cert_types })
    }

    /// Load a pool from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading signing server config from {}", path.display());

        let data = std::fs::read_to_string(path).map_err(|e| {
            SigningError::Config(format!("unable to read {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&data)
    }

    /// All servers of a cert type.
    pub fn servers(&self, cert_type: &str) -> &[SigningServer] {
        self.cert_types
            .iter()
            .find(|(name, _)| name == cert_type)
            .map(|(_, servers)| servers.as_slice())
            .unwrap_or(&[])
    }

    /// Servers of a cert type supporting any of the given formats.
    pub fn suitable_servers<S: AsRef<str>>(
        &self,
        cert_type: &str,
        formats: &[S],
    ) -> Vec<&SigningServer> {
        self.servers(cert_type)
            .iter()
            .filter(|s| s.supports_any(formats))
            .collect()
    }

    /// Like [Self::suitable_servers] but an empty result is an error.
    pub fn require_suitable_servers<S: AsRef<str>>(
        &self,
        cert_type: &str,
        formats: &[S],
    ) -> Result<Vec<&SigningServer>> {
        let servers = self.suitable_servers(cert_type, formats);

        if servers.is_empty() {
            Err(SigningError::NoSuitableServer {
                cert_type: cert_type.to_string(),
                formats: formats.iter().map(|f| f.as_ref().to_string()).collect(),
            })
        } else {
            Ok(servers)
        }
    }
}
