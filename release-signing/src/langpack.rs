// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Language pack signing. */

use {
    crate::{
        autograph::sign_file_with_autograph,
        context::SigningContext,
        error::{Result, SigningError},
    },
    log::info,
    once_cell::sync::Lazy,
    regex::Regex,
    serde_json::Value,
    std::{
        io::Read,
        path::{Path, PathBuf},
    },
};

static LANGPACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^langpack-[a-zA-Z]+(?:-[a-zA-Z]+){0,2}@(?:firefox|devedition)\.mozilla\.org$")
        .expect("langpack id regex is valid")
});

fn invalid(path: &Path) -> SigningError {
    SigningError::FormatPolicy(format!("{} is not a valid langpack", path.display()))
}

fn read_manifest(path: &Path) -> Result<Value> {
    let fh = std::fs::File::open(path)?;
    let mut za = zip::ZipArchive::new(fh).map_err(|e| SigningError::archive(path, e))?;
    let mut zf = za.by_name("manifest.json").map_err(|_| invalid(path))?;

    let mut data = vec![];
    zf.read_to_end(&mut data)?;

    serde_json::from_slice(&data).map_err(|_| invalid(path))
}

/// Extension id of a language pack, read from its `manifest.json`.
pub fn langpack_id(path: &Path) -> Result<String> {
    let manifest = read_manifest(path)?;

    if manifest.get("languages").is_none() || manifest.get("langpack_id").is_none() {
        return Err(invalid(path));
    }

    let id = manifest
        .pointer("/applications/gecko/id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(path))?;

    if !LANGPACK_RE.is_match(id) {
        return Err(SigningError::FormatPolicy(format!(
            "{} has an invalid langpack id {}",
            path.display(),
            id
        )));
    }

    Ok(id.to_string())
}

/// Sign a language pack `.xpi` through Autograph. Returns the signed path.
pub async fn sign_langpack(ctx: &SigningContext, path: &Path, format: &str) -> Result<PathBuf> {
    if path.extension().map(|e| e != "xpi").unwrap_or(true) {
        return Err(SigningError::FormatPolicy(format!(
            "Expected a .xpi, got {}",
            path.display()
        )));
    }

    let id = langpack_id(path)?;
    info!("identified {} as extension id {}", path.display(), id);

    sign_file_with_autograph(ctx, path, format, None, Some(id.as_str())).await
}
