// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing of `omni.ja` resource archives.

Autograph signs an `omni.ja` as an extension and hands back a rewritten
archive. Only the `META-INF` signature entries of that archive are kept:
they are merged into the original archive, whose entry encoding and preload
order must stay untouched.
*/

use {
    crate::{
        archive::{
            convert_dmg_to_tar_gz, create_tar, create_zip, extract_tar, extract_zip,
            ContainerFormat, ZipMode,
        },
        autograph::sign_file_with_autograph,
        context::SigningContext,
        dispatch::join_signing_batch,
        error::{Result, SigningError},
    },
    log::{debug, info},
    omnijar::{JarReader, JarWriter},
    std::path::{Path, PathBuf},
};

const OMNIJA_FILENAME: &str = "omni.ja";

/// Extension id `omni.ja` archives are signed as.
const OMNIJA_EXTENSION_ID: &str = "omni.ja@mozilla.org";

/// Write to `dest` the entries of `orig` plus the `META-INF` entries of `signed`.
///
/// The preload log of `orig` is declared again on the result.
pub fn merge_omnija_files(orig: &Path, signed: &Path, dest: &Path) -> Result<()> {
    let original = JarReader::from_path(orig)?;
    let signed = JarReader::from_path(signed)?;

    let mut writer = JarWriter::new();
    for entry in original.entries() {
        writer.add(entry.clone());
    }

    for entry in signed.into_entries() {
        if entry.name.starts_with("META-INF") {
            debug!("merging {}", entry.name);
            writer.add(entry);
        }
    }

    if original.last_preloaded().is_some() {
        writer.preload(&original.preload_log());
    }

    writer.write_path(dest)?;

    Ok(())
}

/// Sign a single `omni.ja` in place.
pub async fn sign_omnija_with_autograph(
    ctx: &SigningContext,
    from: &Path,
    format: &str,
) -> Result<()> {
    let signed = tempfile::Builder::new()
        .prefix("oj_signed")
        .suffix(".ja")
        .tempfile_in(ctx.work_dir())?;
    let merged = tempfile::Builder::new()
        .prefix("oj_merged")
        .suffix(".ja")
        .tempfile_in(ctx.work_dir())?;

    sign_file_with_autograph(
        ctx,
        from,
        format,
        Some(signed.path()),
        Some(OMNIJA_EXTENSION_ID),
    )
    .await?;

    merge_omnija_files(from, signed.path(), merged.path())?;
    std::fs::copy(merged.path(), from)?;

    Ok(())
}

fn omnija_files(files: &[PathBuf]) -> Vec<&PathBuf> {
    files
        .iter()
        .filter(|p| p.is_file() && p.file_name().map(|n| n == OMNIJA_FILENAME).unwrap_or(false))
        .collect()
}

/// Sign every `omni.ja` inside a package.
///
/// A `.dmg` is converted to a `.tar.gz` first. Returns the package path.
pub async fn sign_omnija(ctx: &SigningContext, path: &Path, format: &str) -> Result<PathBuf> {
    let mut path = path.to_path_buf();
    if ContainerFormat::from_path(&path) == Some(ContainerFormat::Dmg) {
        path = convert_dmg_to_tar_gz(&ctx.config, &path).await?;
    }

    let container = ContainerFormat::from_path(&path);

    let tmp = tempfile::Builder::new()
        .prefix("omnija")
        .tempdir_in(ctx.work_dir())?;

    let all_files = match container {
        Some(ContainerFormat::Zip) => extract_zip(&path, None, tmp.path())?,
        Some(ContainerFormat::Tar(compression)) => extract_tar(&path, compression, tmp.path())?,
        _ => {
            return Err(SigningError::FormatPolicy(format!(
                "Unknown omnija file format for {}",
                path.display()
            )))
        }
    };

    let to_sign = omnija_files(&all_files);
    if to_sign.is_empty() {
        info!("no {} in {}", OMNIJA_FILENAME, path.display());
        return Ok(path);
    }

    join_signing_batch(
        to_sign
            .into_iter()
            .map(|from| sign_omnija_with_autograph(ctx, from, format)),
    )
    .await?;

    match container {
        Some(ContainerFormat::Tar(compression)) => {
            create_tar(&path, &all_files, compression, tmp.path())?
        }
        _ => create_zip(&path, &all_files, tmp.path(), ZipMode::Overwrite)?,
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{archive::TarCompression, testutil},
        httpmock::prelude::*,
        serde_json::json,
        std::io::Write,
        tempfile::TempDir,
        zip::{write::FileOptions, CompressionMethod, ZipWriter},
    };

    fn make_jar(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
        let mut zf = ZipWriter::new(std::io::Cursor::new(vec![]));
        for (name, data) in entries {
            zf.start_file(*name, FileOptions::default().compression_method(method))
                .unwrap();
            zf.write_all(data).unwrap();
        }
        zf.finish().unwrap().into_inner()
    }

    fn original_jar() -> Vec<u8> {
        make_jar(
            &[
                ("chrome.manifest", &b"original manifest"[..]),
                ("modules/a.js", &b"let a = 1;"[..]),
            ],
            CompressionMethod::Stored,
        )
    }

    fn signed_jar() -> Vec<u8> {
        make_jar(
            &[
                ("META-INF/cose.sig", &b"cose"[..]),
                ("META-INF/manifest.mf", &b"Manifest-Version: 1.0"[..]),
                ("chrome.manifest", &b"rewritten"[..]),
                ("modules/a.js", &b"let a = 1;"[..]),
            ],
            CompressionMethod::Deflated,
        )
    }

    #[test]
    fn merge_keeps_original_entries_and_preload() -> Result<()> {
        let td = TempDir::new()?;

        let mut writer = JarWriter::new();
        for entry in JarReader::from_bytes(&original_jar())?.into_entries() {
            writer.add(entry);
        }
        writer.preload(&["modules/a.js"]);
        let orig = td.path().join("omni.ja");
        writer.write_path(&orig)?;

        let signed = td.path().join("signed.ja");
        std::fs::write(&signed, signed_jar())?;

        let dest = td.path().join("merged.ja");
        merge_omnija_files(&orig, &signed, &dest)?;

        let merged = JarReader::from_path(&dest)?;
        assert_eq!(
            merged
                .entries()
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>(),
            vec![
                "modules/a.js",
                "chrome.manifest",
                "META-INF/cose.sig",
                "META-INF/manifest.mf"
            ]
        );
        assert_eq!(merged.last_preloaded(), Some("modules/a.js"));
        assert_eq!(
            merged.entry("chrome.manifest").unwrap().data,
            b"original manifest"
        );
        assert_eq!(merged.entry("chrome.manifest").unwrap().compression, 0);

        Ok(())
    }

    #[tokio::test]
    async fn sign_omnija_in_packages() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/sign/file")
                    .body_contains("omni.ja@mozilla.org");
                then.status(201)
                    .json_body(json!([{"signed_file": base64::encode(signed_jar())}]));
            })
            .await;

        let td = TempDir::new()?;
        let ctx = testutil::context(&td, &testutil::autograph_pool(&server.base_url(), &["autograph_omnija"]))?;

        let src = td.path().join("src");
        std::fs::create_dir_all(src.join("firefox/browser"))?;
        std::fs::write(src.join("firefox/omni.ja"), original_jar())?;
        std::fs::write(src.join("firefox/browser/omni.ja"), original_jar())?;
        std::fs::write(src.join("firefox/firefox"), b"binary")?;
        let files = vec![
            src.join("firefox/omni.ja"),
            src.join("firefox/browser/omni.ja"),
            src.join("firefox/firefox"),
        ];

        let zip_package = ctx.work_dir().join("target.zip");
        create_zip(&zip_package, &files, &src, ZipMode::Overwrite)?;
        let tar_package = ctx.work_dir().join("target.tar.bz2");
        create_tar(&tar_package, &files, TarCompression::Bzip2, &src)?;

        assert_eq!(sign_omnija(&ctx, &zip_package, "autograph_omnija").await?, zip_package);
        assert_eq!(sign_omnija(&ctx, &tar_package, "autograph_omnija").await?, tar_package);
        assert_eq!(mock.hits_async().await, 4);

        let out = td.path().join("zip_out");
        extract_zip(&zip_package, None, &out)?;
        for name in ["firefox/omni.ja", "firefox/browser/omni.ja"] {
            let jar = JarReader::from_path(out.join(name))?;
            assert!(jar.entry("META-INF/cose.sig").is_some());
            assert_eq!(jar.entry("chrome.manifest").unwrap().data, b"original manifest");
        }
        assert_eq!(std::fs::read(out.join("firefox/firefox"))?, b"binary");

        let out = td.path().join("tar_out");
        extract_tar(&tar_package, TarCompression::Bzip2, &out)?;
        let jar = JarReader::from_path(out.join("firefox/omni.ja"))?;
        assert!(jar.entry("META-INF/manifest.mf").is_some());

        Ok(())
    }

    #[tokio::test]
    async fn unknown_package() -> Result<()> {
        let td = TempDir::new()?;
        let ctx = testutil::context(&td, &testutil::autograph_pool("http://127.0.0.1:1", &["autograph_omnija"]))?;
        let path = ctx.work_dir().join("omni.ja");
        std::fs::write(&path, original_jar())?;

        assert!(matches!(
            sign_omnija(&ctx, &path, "autograph_omnija").await,
            Err(SigningError::FormatPolicy(msg)) if msg.starts_with("Unknown omnija file format")
        ));

        Ok(())
    }
}
