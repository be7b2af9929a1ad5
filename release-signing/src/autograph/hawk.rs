// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Hawk request authentication.

Autograph authenticates requests with the Hawk scheme: an HMAC-SHA256 over a
normalized description of the request, keyed with a shared secret and sent
in the `Authorization` header together with the key id, a timestamp and a
nonce.
*/

use {
    crate::error::{Result, SigningError},
    hmac::{Hmac, Mac},
    rand::{distributions::Alphanumeric, Rng},
    reqwest::Url,
    sha2::{Digest, Sha256},
    std::time::{SystemTime, UNIX_EPOCH},
};

type HmacSha256 = Hmac<Sha256>;

/// A Hawk key id and its secret.
#[derive(Clone, Copy, Debug)]
pub struct Credentials<'a> {
    pub id: &'a str,
    pub key: &'a str,
}

/// Base64 SHA-256 of a request body, bound to its content type.
pub fn payload_hash(content_type: &str, body: &[u8]) -> String {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(b"hawk.1.payload\n");
    hasher.update(content_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hasher.update(b"\n");

    base64::encode(hasher.finalize())
}

fn escape_ext(ext: &str) -> String {
    ext.replace('\\', "\\\\").replace('\n', "\\n")
}

/// The Hawk `Authorization` header value for explicit timestamp and nonce.
pub fn authorization_header(
    credentials: Credentials,
    method: &str,
    url: &Url,
    payload_hash: Option<&str>,
    ext: Option<&str>,
    ts: u64,
    nonce: &str,
) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| SigningError::Protocol(format!("{} has no host", url)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SigningError::Protocol(format!("{} has no port", url)))?;

    let resource = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    let ext = ext.map(escape_ext);

    let normalized = format!(
        "hawk.1.header\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
        ts,
        nonce,
        method.to_ascii_uppercase(),
        resource,
        host.to_ascii_lowercase(),
        port,
        payload_hash.unwrap_or_default(),
        ext.as_deref().unwrap_or_default(),
    );

    let mut mac = HmacSha256::new_from_slice(credentials.key.as_bytes())
        .map_err(|e| SigningError::Protocol(format!("invalid Hawk key: {}", e)))?;
    mac.update(normalized.as_bytes());
    let mac = base64::encode(mac.finalize().into_bytes());

    let mut header = format!(
        "Hawk id=\"{}\", ts=\"{}\", nonce=\"{}\"",
        credentials.id, ts, nonce
    );
    if let Some(hash) = payload_hash {
        header.push_str(&format!(", hash=\"{}\"", hash));
    }
    if let Some(ext) = ext {
        header.push_str(&format!(", ext=\"{}\"", ext));
    }
    header.push_str(&format!(", mac=\"{}\"", mac));

    Ok(header)
}

/// The Hawk `Authorization` header value for a request sent now.
pub fn request_authorization(
    credentials: Credentials,
    method: &str,
    url: &Url,
    content_type: &str,
    body: &[u8],
) -> Result<String> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SigningError::Protocol(format!("system clock error: {}", e)))?
        .as_secs();

    let nonce = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>();

    authorization_header(
        credentials,
        method,
        url,
        Some(&payload_hash(content_type, body)),
        None,
        ts,
        &nonce,
    )
}
