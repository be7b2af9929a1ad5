// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing task execution.

Upstream artifacts are downloaded by the worker into
`<work_dir>/cot/<taskId>/<path>`. Each is copied to `<work_dir>/<path>`,
signed there, and the outputs are staged under `<artifact_dir>/<path>`.
*/

use {
    crate::{
        config::SigningConfig,
        context::SigningContext,
        dispatch,
        error::{Result, SigningError},
        server::ServerPool,
        signtool::get_token,
        task::{is_autograph_signing_format, split_autograph_format, Task},
        util::{copy_to_dir, sha256_file, sha512_file},
    },
    log::info,
    std::path::{Path, PathBuf},
};

/// Where the gpg public key is published when a file was gpg signed.
const GPG_KEY_ARTIFACT: &str = "public/build/KEY";

/// An upstream artifact to sign.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileToSign {
    pub task_id: String,
    /// Path relative to the upstream task artifacts.
    pub path: String,
    /// Location of the downloaded artifact.
    pub full_path: PathBuf,
    pub formats: Vec<String>,
}

/// Check the configuration supports the requested formats.
pub fn check_preconditions<S: AsRef<str>>(config: &SigningConfig, formats: &[S]) -> Result<()> {
    let has = |wanted: &str| formats.iter().any(|f| f.as_ref() == wanted);

    if has("gpg") || has("autograph_gpg") {
        match &config.gpg_pubkey {
            None => {
                return Err(SigningError::Config(
                    "GPG format is enabled but gpg_pubkey is not defined".into(),
                ))
            }
            Some(key) if !key.exists() => {
                return Err(SigningError::Config(format!(
                    "gpg_pubkey ({}) doesn't exist!",
                    key.display()
                )))
            }
            Some(_) => {}
        }
    }

    if has("autograph_widevine") && config.widevine_cert.is_none() {
        return Err(SigningError::Config(
            "widevine format is enabled, but widevine_cert is not defined".into(),
        ));
    }

    Ok(())
}

/// Resolve the upstream artifacts of a task.
///
/// Every artifact must have been downloaded and may only request formats
/// the task scopes grant. All problems are reported together.
pub fn build_filelist(config: &SigningConfig, task: &Task) -> Result<Vec<FileToSign>> {
    let allowed = task.signing_formats();

    let mut files = vec![];
    let mut messages = vec![];

    for artifact in &task.payload.upstream_artifacts {
        for path in &artifact.paths {
            let full_path = config
                .work_dir
                .join("cot")
                .join(&artifact.task_id)
                .join(path);

            if !full_path.is_file() {
                messages.push(format!("{} doesn't exist!", full_path.display()));
            }

            for format in &artifact.formats {
                if !allowed.contains(format) {
                    messages.push(format!(
                        "{} format {} is not in the task scopes {:?}",
                        path, format, allowed
                    ));
                }
            }

            files.push(FileToSign {
                task_id: artifact.task_id.clone(),
                path: path.clone(),
                full_path,
                formats: artifact.formats.clone(),
            });
        }
    }

    if messages.is_empty() {
        Ok(files)
    } else {
        Err(SigningError::Scope(messages.join("\n")))
    }
}

fn artifact_name(ctx: &SigningContext, output: &Path) -> PathBuf {
    match output.strip_prefix(ctx.work_dir()) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => PathBuf::from(output.file_name().unwrap_or(output.as_os_str())),
    }
}

/// Sign every upstream artifact of `task`.
///
/// Returns the paths of the staged artifacts.
pub async fn run_task(ctx: &SigningContext, task: &Task) -> Result<Vec<PathBuf>> {
    let formats = task.signing_formats();
    info!("cert type: {}; signing formats: {:?}", ctx.cert_type, formats);

    check_preconditions(&ctx.config, &formats)?;
    let files = build_filelist(&ctx.config, task)?;

    for file in &files {
        for format in &file.formats {
            ctx.require_suitable_servers(&[split_autograph_format(format).0])?;
        }
    }

    if !formats.iter().all(|f| is_autograph_signing_format(f)) {
        get_token(ctx, &formats).await?;
    }

    let mut artifacts = vec![];
    let mut gpg_signed = false;

    for file in &files {
        info!("signing {} with {:?}", file.path, file.formats);

        let work_path = copy_to_dir(&file.full_path, ctx.work_dir(), Some(Path::new(&file.path)))?;

        for output in dispatch::sign(ctx, &work_path, &file.formats).await? {
            let artifact = copy_to_dir(
                &output,
                &ctx.config.artifact_dir,
                Some(artifact_name(ctx, &output).as_path()),
            )?;

            info!(
                "SHA512SUM: {} SIGNED_FILEPATH: {}",
                sha512_file(&artifact)?,
                artifact.display()
            );
            info!(
                "SHA256SUM: {} SIGNED_FILEPATH: {}",
                sha256_file(&artifact)?,
                artifact.display()
            );

            artifacts.push(artifact);
        }

        if file.formats.iter().any(|f| f == "gpg" || f == "autograph_gpg") {
            gpg_signed = true;
        }
    }

    if gpg_signed {
        if let Some(key) = &ctx.config.gpg_pubkey {
            artifacts.push(copy_to_dir(
                key,
                &ctx.config.artifact_dir,
                Some(Path::new(GPG_KEY_ARTIFACT)),
            )?);
        }
    }

    info!("done signing {} artifacts", artifacts.len());

    Ok(artifacts)
}

/// Load the server pool for `config`, set up the run and execute `task`.
pub async fn run(config: SigningConfig, task: &Task) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&config.work_dir)?;
    std::fs::create_dir_all(&config.artifact_dir)?;

    let pool = ServerPool::from_path(&config.signing_server_config)?;
    let ctx = SigningContext::new(config, pool, task.cert_type()?)?;

    run_task(&ctx, task).await
}
