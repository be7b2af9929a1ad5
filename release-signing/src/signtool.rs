// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Legacy signing server backend.

Legacy servers are driven by an external `signtool` client. The client
authenticates with a short lived token fetched ahead of time from one of
the servers' `/token` endpoint.
*/

use {
    crate::{
        context::SigningContext,
        error::{Result, SigningError},
        process::ExternalCommand,
        server::SigningServer,
    },
    log::{info, warn},
    rand::seq::SliceRandom,
    std::path::{Path, PathBuf},
};

/// Command line signing `from` into `to` with `format` on every suitable server.
pub fn build_signtool_cmd(
    ctx: &SigningContext,
    from: &Path,
    format: &str,
    to: Option<&Path>,
) -> Result<Vec<String>> {
    let to = to.unwrap_or(from);
    let ssl_cert = ctx
        .config
        .ssl_cert
        .as_ref()
        .ok_or_else(|| SigningError::Config("ssl_cert is required to use signtool".into()))?;

    let mut cmd = ctx.config.signtool.clone();
    cmd.extend([
        "-n".to_string(),
        ctx.config.nonce_path().to_string_lossy().to_string(),
        "-t".to_string(),
        ctx.config.token_path().to_string_lossy().to_string(),
        "-c".to_string(),
        ssl_cert.to_string_lossy().to_string(),
    ]);

    for server in ctx.suitable_servers(&[format]) {
        cmd.push("-H".to_string());
        cmd.push(server.server.clone());
    }

    cmd.extend([
        "-f".to_string(),
        format.to_string(),
        "-o".to_string(),
        to.to_string_lossy().to_string(),
        from.to_string_lossy().to_string(),
    ]);

    Ok(cmd)
}

/// Sign a file through the legacy signing servers. Returns the signed path.
pub async fn sign_file_with_signtool(
    ctx: &SigningContext,
    from: &Path,
    format: &str,
    to: Option<&Path>,
) -> Result<PathBuf> {
    let cmd = build_signtool_cmd(ctx, from, format, to)?;
    ExternalCommand::new(&cmd)?.run().await?;

    Ok(to.unwrap_or(from).to_path_buf())
}

fn token_url(server: &SigningServer) -> String {
    if server.server.contains("://") {
        format!("{}/token", server.server.trim_end_matches('/'))
    } else {
        format!("https://{}/token", server.server)
    }
}

async fn request_token(ctx: &SigningContext, server: &SigningServer) -> Result<String> {
    let response = ctx
        .http
        .post(token_url(server))
        .basic_auth(&server.user, Some(&server.password))
        .form(&[
            ("slave_ip", ctx.config.my_ip.clone()),
            ("duration", ctx.config.token_duration_seconds.to_string()),
        ])
        .send()
        .await?
        .error_for_status()?;

    Ok(response.text().await?)
}

/// Fetch a signing token and write it to the configured token path.
///
/// Suitable servers are tried in random order until one hands out a
/// non-empty token. Individual failures are logged and skipped.
pub async fn get_token<S: AsRef<str>>(ctx: &SigningContext, formats: &[S]) -> Result<PathBuf> {
    let mut servers = ctx.suitable_servers(formats);
    servers.shuffle(&mut rand::thread_rng());

    for server in servers {
        info!("getting token from {}", server.server);

        match request_token(ctx, server).await {
            Ok(token) if !token.is_empty() => {
                let path = ctx.config.token_path();
                std::fs::write(&path, token)?;
                return Ok(path);
            }
            Ok(_) => warn!("{} returned an empty token", server.server),
            Err(e) => warn!("unable to get token from {}: {}", server.server, e),
        }
    }

    Err(SigningError::Protocol("Cannot retrieve signing token".into()))
}
