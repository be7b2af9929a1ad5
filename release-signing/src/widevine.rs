// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Widevine signing of packaged binaries.

A handful of binaries inside a package get a detached `.sig` file next to
them. On macOS the signature of `Contents/MacOS/x` lives at
`Contents/Resources/x.sig`. Adding signatures changes the package file
list, so `precomplete` is regenerated before the package is rebuilt.
*/

use {
    crate::{
        archive::{
            convert_dmg_to_tar_gz, create_tar, create_zip, extract_tar, extract_zip, list_tar,
            list_zip, ContainerFormat, TarCompression, ZipMode,
        },
        autograph::sign_hash_with_autograph,
        context::SigningContext,
        dispatch::{join_signing_batch, sign_file},
        error::{Result, SigningError},
        precomplete::{remove_extra_files, run_generate_precomplete},
        task::is_autograph_signing_format,
    },
    log::debug,
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
    },
};

/// Binaries whose signature authorizes the others.
const BLESSED_FILENAMES: &[&str] = &["plugin-container", "plugin-container.exe"];

const NONBLESSED_FILENAMES: &[&str] = &[
    "firefox",
    "firefox-bin",
    "firefox.exe",
    "libxul.so",
    "XUL",
    "xul.dll",
    "clearkey.dll",
    "libclearkey.dylib",
    "libclearkey.so",
];

/// Autograph format widevine hashes are signed with.
const AUTOGRAPH_WIDEVINE_FORMAT: &str = "autograph_widevine";

/// Producer of the widevine hash and signature file formats.
pub trait WidevineFormatter {
    /// Digest of `path` to submit for signing.
    fn generate_hash(&self, path: &Path, flags: u32) -> Result<Vec<u8>>;

    /// Content of the `.sig` file for a signature and certificate.
    fn generate_signature(&self, signature: &[u8], certificate: &[u8], flags: u32)
        -> Result<Vec<u8>>;
}

/// How a selected binary gets signed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WidevineFormat {
    Widevine,
    Blessed,
}

impl WidevineFormat {
    /// The legacy signing format name.
    pub fn format_name(&self) -> &'static str {
        match self {
            Self::Widevine => "widevine",
            Self::Blessed => "widevine_blessed",
        }
    }

    pub fn flags(&self) -> u32 {
        match self {
            Self::Widevine => 0,
            Self::Blessed => 1,
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Path of the signature file for `path`.
pub fn mac_sigpath(path: &str) -> String {
    if path.contains("Contents/MacOS") {
        let mut parts = path.split('/').collect::<Vec<_>>();
        if let Some(pos) = parts.iter().rposition(|p| *p == "MacOS") {
            parts[pos] = "Resources";
        }
        let sigpath = format!("{}.sig", parts.join("/"));
        debug!("sigfile for {} should be {}", path, sigpath);
        sigpath
    } else {
        format!("{}.sig", path)
    }
}

/// Select the archive members to sign and how.
///
/// Members whose signature file is already in `names` are skipped.
pub fn widevine_signing_files<S: AsRef<str>>(names: &[S]) -> BTreeMap<String, WidevineFormat> {
    let mut files = BTreeMap::new();

    for name in names {
        let name = name.as_ref();
        let base = basename(name);

        let format = if BLESSED_FILENAMES.contains(&base) {
            WidevineFormat::Blessed
        } else if NONBLESSED_FILENAMES.contains(&base) {
            WidevineFormat::Widevine
        } else {
            continue;
        };

        debug!("found {} to sign {}", name, format.format_name());

        let sigpath = mac_sigpath(name);
        if names.iter().any(|n| n.as_ref() == sigpath) {
            debug!("{} is already signed; skipping", name);
        } else {
            files.insert(name.to_string(), format);
        }
    }

    files
}

/// Write a widevine signature of `from` produced through Autograph.
///
/// `to` defaults to `<from>.sig`. Returns the signature path.
pub async fn sign_widevine_with_autograph(
    ctx: &SigningContext,
    from: &Path,
    blessed: bool,
    to: Option<&Path>,
) -> Result<PathBuf> {
    let formatter = ctx.widevine_formatter()?;

    let to = match to {
        Some(to) => to.to_path_buf(),
        None => PathBuf::from(format!("{}.sig", from.display())),
    };
    let flags = if blessed { 1 } else { 0 };

    let hash = formatter.generate_hash(from, flags)?;
    let signature = sign_hash_with_autograph(ctx, &hash, AUTOGRAPH_WIDEVINE_FORMAT, None).await?;

    let cert_path = ctx
        .config
        .widevine_cert
        .as_ref()
        .ok_or_else(|| SigningError::Config("widevine_cert is not configured".into()))?;
    let certificate = std::fs::read(cert_path)?;

    std::fs::write(&to, formatter.generate_signature(&signature, &certificate, flags)?)?;

    Ok(to)
}

/// Sign `(source, signature, format)` triples.
///
/// Autograph signs run concurrently; legacy signs run one after another.
async fn sign_members(
    ctx: &SigningContext,
    members: &[(PathBuf, PathBuf, WidevineFormat)],
    format: &str,
) -> Result<()> {
    if is_autograph_signing_format(format) {
        join_signing_batch(members.iter().map(|(from, to, wv)| {
            sign_widevine_with_autograph(ctx, from, *wv == WidevineFormat::Blessed, Some(to.as_path()))
        }))
        .await?;
    } else {
        for (from, to, wv) in members {
            sign_file(ctx, from, wv.format_name(), Some(to.as_path())).await?;
        }
    }

    Ok(())
}

async fn sign_widevine_zip(ctx: &SigningContext, path: &Path, format: &str) -> Result<()> {
    let to_sign = widevine_signing_files(&list_zip(path)?);
    debug!("widevine files to sign: {:?}", to_sign);

    if to_sign.is_empty() {
        return Ok(());
    }

    let tmp = tempfile::Builder::new()
        .prefix("wvzip")
        .tempdir_in(ctx.work_dir())?;

    // Extract everything so precomplete sees the full file list.
    let mut all_files = extract_zip(path, None, tmp.path())?;

    let mut members = vec![];
    for (name, wv) in to_sign {
        let from = tmp.path().join(&name);
        let to = PathBuf::from(format!("{}.sig", from.display()));
        all_files.push(to.clone());
        members.push((from, to, wv));
    }

    sign_members(ctx, &members, format).await?;

    remove_extra_files(tmp.path(), &all_files)?;
    run_generate_precomplete(&ctx.config, tmp.path())?;
    create_zip(path, &all_files, tmp.path(), ZipMode::Overwrite)?;

    Ok(())
}

async fn sign_widevine_tar(
    ctx: &SigningContext,
    path: &Path,
    format: &str,
    compression: TarCompression,
) -> Result<()> {
    let to_sign = widevine_signing_files(&list_tar(path, compression)?);
    debug!("widevine files to sign: {:?}", to_sign);

    if to_sign.is_empty() {
        return Ok(());
    }

    let tmp = tempfile::Builder::new()
        .prefix("wvtar")
        .tempdir_in(ctx.work_dir())?;

    let mut all_files = extract_tar(path, compression, tmp.path())?;

    let mut members = vec![];
    for (name, wv) in to_sign {
        let from = tmp.path().join(&name);
        if !from.is_file() {
            continue;
        }

        let to = PathBuf::from(mac_sigpath(&from.to_string_lossy()));
        debug!("adding {} to the sigfile paths", to.display());
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }

        all_files.push(to.clone());
        members.push((from, to, wv));
    }

    sign_members(ctx, &members, format).await?;

    remove_extra_files(tmp.path(), &all_files)?;
    run_generate_precomplete(&ctx.config, tmp.path())?;
    create_tar(path, &all_files, compression, tmp.path())?;

    Ok(())
}

/// Add widevine signatures to the binaries inside a package.
///
/// A `.dmg` is converted to a `.tar.gz` first. Returns the package path.
pub async fn sign_widevine(ctx: &SigningContext, path: &Path, format: &str) -> Result<PathBuf> {
    let mut path = path.to_path_buf();
    if ContainerFormat::from_path(&path) == Some(ContainerFormat::Dmg) {
        path = convert_dmg_to_tar_gz(&ctx.config, &path).await?;
    }

    match ContainerFormat::from_path(&path) {
        Some(ContainerFormat::Zip) => sign_widevine_zip(ctx, &path, format).await?,
        Some(ContainerFormat::Tar(compression)) => {
            sign_widevine_tar(ctx, &path, format, compression).await?
        }
        _ => {
            return Err(SigningError::FormatPolicy(format!(
                "Unknown widevine file format for {}",
                path.display()
            )))
        }
    }

    Ok(path)
}
