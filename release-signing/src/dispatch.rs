// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mapping of signing formats to signing strategies.

A file requested with several formats is signed by each in turn, the
output of one format feeding the next. Formats signing the final bytes of a
file (or specific files inside a final package) are moved to the end of
the chain.
*/

use {
    crate::{
        archive::{convert_dmg_to_tar_gz, ContainerFormat},
        autograph::{sign_file_with_autograph, sign_gpg_with_autograph},
        config::SigningConfig,
        context::SigningContext,
        error::{Result, SigningError},
        langpack::sign_langpack,
        mar::sign_mar384_with_autograph_hash,
        omnija::sign_omnija,
        process::ExternalCommand,
        signcode::sign_signcode,
        signtool::sign_file_with_signtool,
        task::{is_autograph_signing_format, split_autograph_format},
        widevine::sign_widevine,
    },
    log::info,
    std::{
        future::Future,
        path::{Path, PathBuf},
    },
};

/// Formats moved to the end of a format chain, in this order.
const FORMATS_RUN_LAST: &[&str] = &[
    "autograph_widevine",
    "widevine",
    "widevine_blessed",
    "macapp",
    "autograph_gpg",
    "gpg",
];

/// How a file gets signed for a given format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigningStrategy {
    /// Sign the file as a whole with the signing backend for the format.
    File,
    /// Detached signature through the legacy servers.
    Gpg,
    /// Detached signature through Autograph.
    AutographGpg,
    /// Sign in place then zip align.
    Jar,
    /// Sign a mac package, converting a `.dmg` first.
    Macapp,
    /// Windows code signing of a binary or of the binaries in a zip.
    Signcode,
    /// Widevine signatures for the binaries inside a package.
    Widevine,
    /// Autograph signing of the `omni.ja` files inside a package.
    Omnija,
    /// Autograph signing of a language pack extension.
    Langpack,
    /// MAR signature block injection from an Autograph signed hash.
    MarHash,
}

impl SigningStrategy {
    pub fn for_format(format: &str) -> Self {
        let (base, _) = split_autograph_format(format);

        match base {
            "gpg" => Self::Gpg,
            "autograph_gpg" => Self::AutographGpg,
            "jar" => Self::Jar,
            "macapp" => Self::Macapp,
            "osslsigncode" | "sha2signcode" | "sha2signcodestub" | "signcode" => Self::Signcode,
            "widevine" | "widevine_blessed" | "autograph_widevine" => Self::Widevine,
            "autograph_hash_only_mar384" | "autograph_stage_mar384" => Self::MarHash,
            _ if base.ends_with("-jar") => Self::Jar,
            _ if base.starts_with("autograph_omnija") => Self::Omnija,
            _ if base.starts_with("autograph_langpack") => Self::Langpack,
            _ => Self::File,
        }
    }

    /// Whether the strategy produces more than one output file.
    ///
    /// Such formats must be the last of a chain.
    pub fn is_multi_output(&self) -> bool {
        matches!(self, Self::Gpg | Self::AutographGpg)
    }

    /// Sign `path` with `format`. Returns the output paths.
    pub async fn apply(
        &self,
        ctx: &SigningContext,
        path: &Path,
        format: &str,
    ) -> Result<Vec<PathBuf>> {
        Ok(match self {
            Self::File => vec![sign_file(ctx, path, format, None).await?],
            Self::Gpg => sign_gpg(ctx, path, format).await?,
            Self::AutographGpg => sign_gpg_with_autograph(ctx, path, format).await?,
            Self::Jar => vec![sign_jar(ctx, path, format).await?],
            Self::Macapp => vec![sign_macapp(ctx, path, format).await?],
            Self::Signcode => vec![sign_signcode(ctx, path, format).await?],
            Self::Widevine => vec![sign_widevine(ctx, path, format).await?],
            Self::Omnija => vec![sign_omnija(ctx, path, format).await?],
            Self::Langpack => vec![sign_langpack(ctx, path, format).await?],
            Self::MarHash => vec![sign_mar384_with_autograph_hash(ctx, path, format, None).await?],
        })
    }
}

/// Order in which `formats` are applied.
///
/// Formats of [FORMATS_RUN_LAST] present in the list are moved to the end.
pub fn reorder_formats<S: AsRef<str>>(formats: &[S]) -> Vec<String> {
    let mut formats = formats
        .iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>();

    for last in FORMATS_RUN_LAST {
        if let Some(pos) = formats.iter().position(|f| f == last) {
            let format = formats.remove(pos);
            formats.push(format);
        }
    }

    formats
}

/// Sign `path` with every format of `formats`. Returns the output paths.
pub async fn sign<S: AsRef<str>>(
    ctx: &SigningContext,
    path: &Path,
    formats: &[S],
) -> Result<Vec<PathBuf>> {
    let formats = reorder_formats(formats);

    let chain = formats
        .iter()
        .map(|f| (f.as_str(), SigningStrategy::for_format(f)))
        .collect::<Vec<_>>();

    if let Some((format, _)) = chain
        .iter()
        .rev()
        .skip(1)
        .find(|(_, strategy)| strategy.is_multi_output())
    {
        return Err(SigningError::FormatPolicy(format!(
            "{} produces several files and must be the last format of {:?}",
            format, formats
        )));
    }

    let mut outputs = vec![path.to_path_buf()];

    for (format, strategy) in chain {
        let input = outputs
            .first()
            .cloned()
            .unwrap_or_else(|| path.to_path_buf());

        info!("signing {} with {}", input.display(), format);
        outputs = strategy.apply(ctx, &input, format).await?;
    }

    Ok(outputs)
}

/// Sign a file as a whole through the backend the format name selects.
///
/// `to` defaults to `from`. Returns the signed path.
pub async fn sign_file(
    ctx: &SigningContext,
    from: &Path,
    format: &str,
    to: Option<&Path>,
) -> Result<PathBuf> {
    if is_autograph_signing_format(format) {
        sign_file_with_autograph(ctx, from, format, to, None).await
    } else {
        sign_file_with_signtool(ctx, from, format, to).await
    }
}

/// Detached signature of `path` at `<path>.asc`. Returns `[path, path.asc]`.
pub async fn sign_gpg(ctx: &SigningContext, path: &Path, format: &str) -> Result<Vec<PathBuf>> {
    let mut to = path.as_os_str().to_owned();
    to.push(".asc");
    let to = PathBuf::from(to);

    sign_file(ctx, path, format, Some(to.as_path())).await?;

    Ok(vec![path.to_path_buf(), to])
}

/// Sign an APK in place and zip align it.
pub async fn sign_jar(ctx: &SigningContext, path: &Path, format: &str) -> Result<PathBuf> {
    sign_file(ctx, path, format, None).await?;
    zip_align_apk(&ctx.config, path).await?;

    Ok(path.to_path_buf())
}

/// Replace `apk` with a 4 byte aligned copy of itself.
pub async fn zip_align_apk(config: &SigningConfig, apk: &Path) -> Result<()> {
    let parent = apk
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let td = tempfile::Builder::new()
        .prefix("zipalign")
        .tempdir_in(parent)?;
    let aligned = td.path().join("aligned.apk");

    let mut cmd = vec![config.zipalign.clone()];
    if config.verbose {
        cmd.push("-v".to_string());
    }
    cmd.extend([
        "4".to_string(),
        apk.to_string_lossy().to_string(),
        aligned.to_string_lossy().to_string(),
    ]);

    ExternalCommand::new(&cmd)?.run().await?;

    std::fs::rename(&aligned, apk)?;

    Ok(())
}

/// Sign a mac package. A `.dmg` is converted to a `.tar.gz` first.
pub async fn sign_macapp(ctx: &SigningContext, path: &Path, format: &str) -> Result<PathBuf> {
    let path = if ContainerFormat::from_path(path) == Some(ContainerFormat::Dmg) {
        convert_dmg_to_tar_gz(&ctx.config, path).await?
    } else {
        path.to_path_buf()
    };

    sign_file(ctx, &path, format, None).await
}

/// Await a batch of independent signing operations.
///
/// Every operation runs to completion. Failures are reported together.
pub(crate) async fn join_signing_batch<T, F>(operations: impl IntoIterator<Item = F>) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>>,
{
    let mut values = vec![];
    let mut errors = vec![];

    for res in futures::future::join_all(operations).await {
        match res {
            Ok(value) => values.push(value),
            Err(e) => errors.push(e),
        }
    }

    SigningError::from_batch(errors)?;

    Ok(values)
}
