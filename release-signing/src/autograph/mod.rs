// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Autograph signing client.

Autograph takes a JSON list of signing requests at `/sign/file`,
`/sign/hash` or `/sign/data` and answers with a list of base64 encoded
results. Requests are authenticated with Hawk.
*/

pub mod hawk;

use {
    crate::{
        context::SigningContext,
        error::{Result, SigningError},
        server::SigningServer,
        task::{
            is_apk_autograph_signing_format, is_autograph_signing_format,
            is_sha1_apk_autograph_signing_format,
        },
    },
    log::debug,
    reqwest::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Url,
    },
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

/// Autograph endpoint flavor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AutographMethod {
    /// Sign a whole file and get the signed file back.
    File,
    /// Sign a precomputed digest and get a detached signature back.
    Hash,
    /// Sign arbitrary data and get a detached signature back.
    Data,
}

impl AutographMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Hash => "hash",
            Self::Data => "data",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SigningOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkcs7_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cose_algorithms: Option<Vec<String>>,
}

/// A single Autograph signing request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SigningRequest {
    /// Base64 of the input.
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<SigningOptions>,
}

impl SigningRequest {
    /// Build the request signing `input` with `format`.
    ///
    /// APK formats keep their zip compression untouched, omnija and langpack
    /// formats are signed as extensions with id `extension_id`.
    pub fn new(input: &[u8], format: &str, keyid: Option<&str>, extension_id: Option<&str>) -> Self {
        let mut options = None;

        if is_apk_autograph_signing_format(format) {
            options = Some(SigningOptions {
                zip: Some("passthrough".into()),
                pkcs7_digest: if is_sha1_apk_autograph_signing_format(format) {
                    Some("SHA1".into())
                } else {
                    None
                },
                ..Default::default()
            });
        }

        if format.contains("omnija") || format.contains("langpack") {
            let options = options.get_or_insert_with(SigningOptions::default);
            options.id = extension_id.map(|s| s.to_string());
            options.cose_algorithms = Some(vec!["ES256".into()]);
            options.pkcs7_digest = Some("SHA256".into());
        }

        Self {
            input: base64::encode(input),
            keyid: keyid.map(|s| s.to_string()),
            options,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct SigningResponse {
    #[serde(default)]
    signed_file: Option<String>,
    #[serde(default)]
    signature: Option<String>,
}

async fn call_autograph(
    client: &reqwest::Client,
    url: &Url,
    server: &SigningServer,
    requests: &[SigningRequest],
) -> Result<Vec<SigningResponse>> {
    let body = serde_json::to_vec(requests)?;

    let authorization = hawk::request_authorization(
        hawk::Credentials {
            id: &server.user,
            key: &server.password,
        },
        "POST",
        url,
        "application/json",
        &body,
    )?;

    let response = client
        .post(url.clone())
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, authorization)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;
    debug!(
        "autograph response: {}",
        text.chars().take(120).collect::<String>()
    );

    if !status.is_success() {
        return Err(SigningError::Protocol(format!("{} returned {}", url, status)));
    }

    Ok(serde_json::from_str(&text)?)
}

/// Sign `input` on `server` and return the base64 result.
///
/// The call is retried according to the context retry policy. Failure
/// after the last attempt is a [SigningError::Protocol].
pub async fn sign_with_autograph(
    ctx: &SigningContext,
    server: &SigningServer,
    input: &[u8],
    format: &str,
    method: AutographMethod,
    keyid: Option<&str>,
    extension_id: Option<&str>,
) -> Result<String> {
    let requests = vec![SigningRequest::new(input, format, keyid, extension_id)];

    debug!("signing data with format {} with {}", format, method.as_str());

    let url = Url::parse(&format!(
        "{}/sign/{}",
        server.server.trim_end_matches('/'),
        method.as_str()
    ))
    .map_err(|e| SigningError::Config(format!("bad autograph url {}: {}", server.server, e)))?;

    let responses = ctx
        .retry
        .retry("autograph request", || {
            call_autograph(&ctx.http, &url, server, &requests)
        })
        .await
        .map_err(|e| match e {
            SigningError::Protocol(_) => e,
            other => SigningError::Protocol(format!("autograph request to {} failed: {}", url, other)),
        })?;

    let response = responses
        .into_iter()
        .next()
        .ok_or_else(|| SigningError::Protocol("empty autograph response".into()))?;

    let value = match method {
        AutographMethod::File => response.signed_file,
        AutographMethod::Hash | AutographMethod::Data => response.signature,
    };

    value.ok_or_else(|| {
        SigningError::Protocol(format!(
            "autograph response lacks the {} result",
            method.as_str()
        ))
    })
}

fn decode(value: &str) -> Result<Vec<u8>> {
    base64::decode(value)
        .map_err(|e| SigningError::Protocol(format!("invalid base64 from autograph: {}", e)))
}

fn ensure_autograph_format(format: &str) -> Result<()> {
    if is_autograph_signing_format(format) {
        Ok(())
    } else {
        Err(SigningError::FormatPolicy(format!(
            "Not an autograph format: {}",
            format
        )))
    }
}

/// Sign a file through Autograph, writing the signed file to `to`.
///
/// `to` defaults to `from`. Returns the signed path.
pub async fn sign_file_with_autograph(
    ctx: &SigningContext,
    from: &Path,
    format: &str,
    to: Option<&Path>,
    extension_id: Option<&str>,
) -> Result<PathBuf> {
    ensure_autograph_format(format)?;
    let server = ctx.autograph_server(format)?;

    let to = to.unwrap_or(from).to_path_buf();
    let input = std::fs::read(from)?;

    let signed = decode(
        &sign_with_autograph(
            ctx,
            server,
            &input,
            format,
            AutographMethod::File,
            None,
            extension_id,
        )
        .await?,
    )?;

    std::fs::write(&to, signed)?;

    Ok(to)
}

/// Produce a detached armored signature `<from>.asc` through Autograph.
///
/// Returns `[from, from.asc]`.
pub async fn sign_gpg_with_autograph(
    ctx: &SigningContext,
    from: &Path,
    format: &str,
) -> Result<Vec<PathBuf>> {
    ensure_autograph_format(format)?;
    let server = ctx.autograph_server(format)?;

    let mut to = from.as_os_str().to_owned();
    to.push(".asc");
    let to = PathBuf::from(to);

    let input = std::fs::read(from)?;
    let signature = sign_with_autograph(
        ctx,
        server,
        &input,
        format,
        AutographMethod::Data,
        None,
        None,
    )
    .await?;

    std::fs::write(&to, signature)?;

    Ok(vec![from.to_path_buf(), to])
}

/// Sign a digest through Autograph and return the raw signature.
pub async fn sign_hash_with_autograph(
    ctx: &SigningContext,
    hash: &[u8],
    format: &str,
    keyid: Option<&str>,
) -> Result<Vec<u8>> {
    ensure_autograph_format(format)?;
    let server = ctx.autograph_server(format)?;

    decode(
        &sign_with_autograph(ctx, server, hash, format, AutographMethod::Hash, keyid, None)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{retry::RetryPolicy, testutil},
        httpmock::prelude::*,
        serde_json::json,
        tempfile::TempDir,
    };

    #[test]
    fn request_options() {
        let request = SigningRequest::new(b"data", "autograph_mar384", Some("key"), None);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"input": "ZGF0YQ==", "keyid": "key"})
        );

        let request = SigningRequest::new(b"apk", "autograph_apk_foo_sha1", None, None);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"input": "YXBr", "options": {"zip": "passthrough", "pkcs7_digest": "SHA1"}})
        );

        let request = SigningRequest::new(b"apk", "autograph_apk", None, None);
        assert_eq!(
            serde_json::to_value(&request).unwrap()["options"],
            json!({"zip": "passthrough"})
        );

        let request =
            SigningRequest::new(b"ja", "autograph_omnija", None, Some("omni.ja@mozilla.org"));
        assert_eq!(
            serde_json::to_value(&request).unwrap()["options"],
            json!({
                "id": "omni.ja@mozilla.org",
                "cose_algorithms": ["ES256"],
                "pkcs7_digest": "SHA256"
            })
        );
    }

    #[tokio::test]
    async fn sign_file() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/sign/file")
                    .header("content-type", "application/json")
                    .header_exists("authorization")
                    .json_body(json!([{"input": "dW5zaWduZWQ="}]));
                then.status(201)
                    .json_body(json!([{"signed_file": base64::encode(b"signed")}]));
            })
            .await;

        let td = TempDir::new()?;
        let ctx = testutil::context(&td, &testutil::autograph_pool(&server.base_url(), &["autograph_focus"]))?;

        let path = td.path().join("app.apk");
        std::fs::write(&path, b"unsigned")?;

        let out = sign_file_with_autograph(&ctx, &path, "autograph_focus", None, None).await?;

        mock.assert_async().await;
        assert_eq!(out, path);
        assert_eq!(std::fs::read(&path)?, b"signed");

        Ok(())
    }

    #[tokio::test]
    async fn sign_gpg_and_hash() -> Result<()> {
        let server = MockServer::start_async().await;
        let data = server
            .mock_async(|when, then| {
                when.method(POST).path("/sign/data");
                then.status(201)
                    .json_body(json!([{"signature": "-----BEGIN PGP SIGNATURE-----"}]));
            })
            .await;
        let hash = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/sign/hash")
                    .json_body(json!([{"input": "aGFzaA==", "keyid": "key1"}]));
                then.status(201)
                    .json_body(json!([{"signature": base64::encode([7u8; 4])}]));
            })
            .await;

        let td = TempDir::new()?;
        let ctx = testutil::context(
            &td,
            &testutil::autograph_pool(&server.base_url(), &["autograph_gpg", "autograph_hash_only_mar384"]),
        )?;

        let path = td.path().join("target.tar.gz");
        std::fs::write(&path, b"tarball")?;

        let outputs = sign_gpg_with_autograph(&ctx, &path, "autograph_gpg").await?;
        assert_eq!(outputs, vec![path.clone(), td.path().join("target.tar.gz.asc")]);
        assert_eq!(
            std::fs::read_to_string(&outputs[1])?,
            "-----BEGIN PGP SIGNATURE-----"
        );
        data.assert_async().await;

        let signature =
            sign_hash_with_autograph(&ctx, b"hash", "autograph_hash_only_mar384", Some("key1"))
                .await?;
        assert_eq!(signature, vec![7u8; 4]);
        hash.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn retries_then_fails() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/sign/file");
                then.status(500).body("boom");
            })
            .await;

        let td = TempDir::new()?;
        let mut ctx = testutil::context(&td, &testutil::autograph_pool(&server.base_url(), &["autograph_focus"]))?;
        ctx.retry = RetryPolicy::immediate(3);

        let path = td.path().join("app.apk");
        std::fs::write(&path, b"unsigned")?;

        let res = sign_file_with_autograph(&ctx, &path, "autograph_focus", None, None).await;

        assert!(matches!(res, Err(SigningError::Protocol(_))));
        assert_eq!(mock.hits_async().await, 3);
        assert_eq!(std::fs::read(&path)?, b"unsigned");

        Ok(())
    }

    #[tokio::test]
    async fn malformed_response() -> Result<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/sign/hash");
                then.status(200).json_body(json!([]));
            })
            .await;

        let td = TempDir::new()?;
        let mut ctx = testutil::context(&td, &testutil::autograph_pool(&server.base_url(), &["autograph_widevine"]))?;
        ctx.retry = RetryPolicy::immediate(1);

        assert!(matches!(
            sign_hash_with_autograph(&ctx, b"hash", "autograph_widevine", None).await,
            Err(SigningError::Protocol(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn format_checks() -> Result<()> {
        let td = TempDir::new()?;
        let ctx = testutil::context(&td, &testutil::autograph_pool("http://127.0.0.1:1", &["autograph_gpg"]))?;
        let path = td.path().join("file");
        std::fs::write(&path, b"x")?;

        assert!(matches!(
            sign_file_with_autograph(&ctx, &path, "gpg", None, None).await,
            Err(SigningError::FormatPolicy(_))
        ));
        assert!(matches!(
            sign_file_with_autograph(&ctx, &path, "autograph_focus", None, None).await,
            Err(SigningError::NoSuitableServer { .. })
        ));

        Ok(())
    }
}
