// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-run signing state. */

use {
    crate::{
        config::SigningConfig,
        error::{Result, SigningError},
        retry::RetryPolicy,
        server::{ServerPool, SigningServer},
        widevine::WidevineFormatter,
    },
    std::path::Path,
};

/// Everything a signing operation needs, created once per run.
///
/// The server pool and HTTP client are shared read-only by every operation
/// of the run.
pub struct SigningContext {
    pub config: SigningConfig,
    pub pool: ServerPool,
    /// Full cert scope of the task, e.g. `project:releng:signing:cert:dep-signing`.
    pub cert_type: String,
    pub http: reqwest::Client,
    /// Retry policy for Autograph calls.
    pub retry: RetryPolicy,
    widevine: Option<Box<dyn WidevineFormatter + Send + Sync>>,
}

impl SigningContext {
    pub fn new(config: SigningConfig, pool: ServerPool, cert_type: impl Into<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(cert) = &config.ssl_cert {
            let pem = std::fs::read(cert).map_err(|e| {
                SigningError::Config(format!("unable to read {}: {}", cert.display(), e))
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            config,
            pool,
            cert_type: cert_type.into(),
            http: builder.build()?,
            retry: RetryPolicy::default(),
            widevine: None,
        })
    }

    /// Install the formatter producing widevine hashes and signature files.
    pub fn with_widevine_formatter(
        mut self,
        formatter: impl WidevineFormatter + Send + Sync + 'static,
    ) -> Self {
        self.widevine = Some(Box::new(formatter));
        self
    }

    pub fn widevine_formatter(&self) -> Result<&(dyn WidevineFormatter + Send + Sync)> {
        self.widevine
            .as_deref()
            .ok_or_else(|| SigningError::Config("no widevine formatter available".into()))
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Servers of the task cert type supporting any of `formats`.
    pub fn suitable_servers<S: AsRef<str>>(&self, formats: &[S]) -> Vec<&SigningServer> {
        self.pool.suitable_servers(&self.cert_type, formats)
    }

    /// Like [Self::suitable_servers] but an empty result is an error.
    pub fn require_suitable_servers<S: AsRef<str>>(
        &self,
        formats: &[S],
    ) -> Result<Vec<&SigningServer>> {
        self.pool.require_suitable_servers(&self.cert_type, formats)
    }

    /// The server Autograph requests for `format` go to.
    pub fn autograph_server(&self, format: &str) -> Result<&SigningServer> {
        let servers = self.require_suitable_servers(&[format])?;

        servers.into_iter().next().ok_or_else(|| SigningError::NoSuitableServer {
            cert_type: self.cert_type.clone(),
            formats: vec![format.to_string()],
        })
    }
}
