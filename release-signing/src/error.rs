// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {mozilla_mar::MarError, omnijar::JarError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("task scope error: {0}")]
    Scope(String),

    #[error("no signing servers found with cert type {cert_type} and formats {formats:?}")]
    NoSuitableServer {
        cert_type: String,
        formats: Vec<String>,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("external tool error: {0}")]
    ExternalTool(String),

    #[error("signing protocol error: {0}")]
    Protocol(String),

    #[error("format policy error: {0}")]
    FormatPolicy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("MAR error: {0}")]
    Mar(#[from] MarError),

    #[error("jar error: {0}")]
    Jar(#[from] JarError),

    #[error("{} signing operations failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<SigningError>),
}

fn join_errors(errors: &[SigningError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SigningError {
    /// Collapse the errors of a batch of operations.
    ///
    /// No errors is success. A single error is returned as is.
    pub fn from_batch(mut errors: Vec<SigningError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Wrap an archive library error with the path it occurred on.
    pub fn archive(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Archive(format!("{}: {}", path.display(), err))
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_collapse() {
        assert!(SigningError::from_batch(vec![]).is_ok());

        assert!(matches!(
            SigningError::from_batch(vec![SigningError::Scope("one".into())]),
            Err(SigningError::Scope(_))
        ));

        let err = SigningError::from_batch(vec![
            SigningError::Protocol("first".into()),
            SigningError::FormatPolicy("second".into()),
        ])
        .unwrap_err();

        assert!(matches!(&err, SigningError::Multiple(errors) if errors.len() == 2));
        assert_eq!(
            err.to_string(),
            "2 signing operations failed: signing protocol error: first; format policy error: second"
        );
    }
}
