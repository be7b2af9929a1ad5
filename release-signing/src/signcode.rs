// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Windows code signing. */

use {
    crate::{
        archive::{create_zip, extract_zip, ContainerFormat, ZipMode},
        context::SigningContext,
        dispatch::sign_file,
        error::{Result, SigningError},
    },
    log::{debug, info},
    std::path::{Path, PathBuf},
};

const SIGNABLE_EXTENSIONS: &[&str] = &["dll", "exe", "msi", "bin"];

/// Binaries shipped already signed by Microsoft.
const MICROSOFT_SIGNED: &[&str] = &[
    "D3DCompiler_42.dll",
    "d3dx9_42.dll",
    "D3DCompiler_43.dll",
    "d3dx9_43.dll",
    "msvc*.dll",
];

/// Whether a file should get a Windows code signature.
pub fn should_sign_windows(path: &Path) -> bool {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    if !SIGNABLE_EXTENSIONS.contains(&extension.as_str()) {
        return false;
    }

    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    !MICROSOFT_SIGNED.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(&basename))
            .unwrap_or(false)
    })
}

/// Sign a Windows binary, or the Windows binaries inside a zip.
///
/// Returns the signed path.
pub async fn sign_signcode(ctx: &SigningContext, path: &Path, format: &str) -> Result<PathBuf> {
    let (tmp, all_files) = if ContainerFormat::from_path(path) == Some(ContainerFormat::Zip) {
        let tmp = tempfile::Builder::new()
            .prefix("zip")
            .tempdir_in(ctx.work_dir())?;
        let files = extract_zip(path, None, tmp.path())?;
        (Some(tmp), files)
    } else {
        (None, vec![path.to_path_buf()])
    };

    let to_sign = all_files
        .iter()
        .filter(|p| p.is_file() && should_sign_windows(p))
        .collect::<Vec<_>>();

    if to_sign.is_empty() {
        return Err(SigningError::FormatPolicy(format!(
            "Did not find any files to sign, all files: {:?}",
            all_files
        )));
    }

    for from in to_sign {
        debug!("signing {}", from.display());
        sign_file(ctx, from, format, None).await?;
    }

    if let Some(tmp) = &tmp {
        info!("repacking {}", path.display());
        create_zip(path, &all_files, tmp.path(), ZipMode::Overwrite)?;
    }

    Ok(path.to_path_buf())
}
