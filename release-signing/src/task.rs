// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing task definitions and scope handling.

A task carries a list of scopes granting it a single certificate level and a
set of signing formats, and a payload listing the upstream artifacts to sign.
*/

use {
    crate::error::{Result, SigningError},
    serde::Deserialize,
    std::path::Path,
};

/// Scope prefix granting a certificate level.
pub const CERT_SCOPE_PREFIX: &str = "project:releng:signing:cert:";

/// Scope prefix granting a signing format.
pub const FORMAT_SCOPE_PREFIX: &str = "project:releng:signing:format:";

/// Prefix of formats signed through Autograph.
pub const AUTOGRAPH_FORMAT_PREFIX: &str = "autograph_";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamArtifact {
    pub task_id: String,
    pub paths: Vec<String>,
    pub formats: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub upstream_artifacts: Vec<UpstreamArtifact>,
}

/// A signing task.
#[derive(Clone, Debug, Deserialize)]
pub struct Task {
    pub scopes: Vec<String>,
    pub payload: TaskPayload,
}

impl Task {
    pub fn from_json_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_slice(&std::fs::read(path)?)
    }

    /// The single cert type scope of this task.
    pub fn cert_type(&self) -> Result<&str> {
        task_cert_type(&self.scopes)
    }

    /// The signing formats this task's scopes allow.
    pub fn signing_formats(&self) -> Vec<String> {
        task_signing_formats(&self.scopes)
    }
}

/// Extract the cert type scope from a list of scopes.
///
/// Exactly one cert scope must be present. The full scope string is
/// returned, as that is how the server pool is keyed.
pub fn task_cert_type<S: AsRef<str>>(scopes: &[S]) -> Result<&str> {
    let certs = scopes
        .iter()
        .map(|s| s.as_ref())
        .filter(|s| s.starts_with(CERT_SCOPE_PREFIX))
        .collect::<Vec<_>>();

    match certs.as_slice() {
        [cert] => Ok(*cert),
        [] => Err(SigningError::Scope(format!(
            "no {}* scope found",
            CERT_SCOPE_PREFIX
        ))),
        many => Err(SigningError::Scope(format!(
            "expected exactly one cert scope; got {}",
            many.join(", ")
        ))),
    }
}

/// Extract the signing formats from a list of scopes.
///
/// Any `:keyid` suffix on a format is preserved.
pub fn task_signing_formats<S: AsRef<str>>(scopes: &[S]) -> Vec<String> {
    scopes
        .iter()
        .filter_map(|s| s.as_ref().strip_prefix(FORMAT_SCOPE_PREFIX))
        .map(|s| s.to_string())
        .collect()
}

/// Split a format into the format proper and an optional key id.
///
/// `autograph_hash_only_mar384:release_rsa_alt` becomes
/// `("autograph_hash_only_mar384", Some("release_rsa_alt"))`.
pub fn split_autograph_format(format: &str) -> (&str, Option<&str>) {
    match format.split_once(':') {
        Some((format, keyid)) => (format, Some(keyid)),
        None => (format, None),
    }
}

/// Whether a format is signed through Autograph.
pub fn is_autograph_signing_format(format: &str) -> bool {
    format.starts_with(AUTOGRAPH_FORMAT_PREFIX)
}

/// Whether a format is an Autograph APK format.
pub fn is_apk_autograph_signing_format(format: &str) -> bool {
    format.starts_with("autograph_apk")
}

/// Whether a format is an Autograph APK format producing SHA-1 digests.
pub fn is_sha1_apk_autograph_signing_format(format: &str) -> bool {
    is_apk_autograph_signing_format(format) && format.ends_with("_sha1")
}
