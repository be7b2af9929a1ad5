// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Unpacking and repacking of zip, tar and dmg containers.

Extraction always happens into a freshly emptied directory and refuses
members that would land outside of it. Tar archives we create have the
ownership of every member reset to root with empty user and group names.
*/

use {
    crate::{
        config::SigningConfig,
        error::{Result, SigningError},
        process::ExternalCommand,
    },
    log::{debug, info, Level},
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        fs::File,
        io::{Read, Write},
        path::{Component, Path, PathBuf},
    },
    tempfile::NamedTempFile,
    zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter},
};

static DMG_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.dmg$").expect("static regular expression should compile")
});

/// Compression of a tar archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TarCompression {
    Gzip,
    Bzip2,
}

impl TarCompression {
    /// Resolve a compression from a file extension, with or without leading dot.
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension.trim_start_matches('.') {
            "gz" => Ok(Self::Gzip),
            "bz2" => Ok(Self::Bzip2),
            other => Err(SigningError::FormatPolicy(format!(
                "{} not a supported tarfile compression format",
                other
            ))),
        }
    }

    fn decoder(&self, fh: File) -> Box<dyn Read> {
        match self {
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(fh)),
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(fh)),
        }
    }
}

/// The kind of container a signing input is, judging by its file name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerFormat {
    Zip,
    Tar(TarCompression),
    Dmg,
}

impl ContainerFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();

        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.bz2") {
            Some(Self::Tar(TarCompression::Bzip2))
        } else if name.ends_with(".tar.gz") {
            Some(Self::Tar(TarCompression::Gzip))
        } else if DMG_SUFFIX_RE.is_match(&name) {
            Some(Self::Dmg)
        } else {
            None
        }
    }
}

/// How [create_zip] treats an existing archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZipMode {
    Overwrite,
    Append,
}

/// Remove a directory and recreate it empty.
fn reset_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)?;

    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// A temporary file next to `dest` that a new archive is written to.
fn staging_file(dest: &Path) -> Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    Ok(tempfile::Builder::new().prefix(".repack").tempfile_in(dir)?)
}

/// Move a fully written archive over `dest`, keeping the permissions of
/// the archive it replaces.
fn persist_staged(staged: NamedTempFile, dest: &Path) -> Result<()> {
    if let Ok(metadata) = std::fs::metadata(dest) {
        std::fs::set_permissions(staged.path(), metadata.permissions())?;
    }

    staged
        .persist(dest)
        .map_err(|e| SigningError::archive(dest, e.error))?;

    Ok(())
}

/// Archive member name of a path relative to a base directory.
fn member_name(path: &Path, base_dir: &Path) -> Result<Option<String>> {
    let rel = path.strip_prefix(base_dir).map_err(|_| {
        SigningError::Archive(format!(
            "{} is not under {}",
            path.display(),
            base_dir.display()
        ))
    })?;

    let parts = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>();

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

/// Member names of a zip archive, in archive order.
pub fn list_zip(path: &Path) -> Result<Vec<String>> {
    let mut za = ZipArchive::new(File::open(path)?).map_err(|e| SigningError::archive(path, e))?;

    (0..za.len())
        .map(|i| {
            za.by_index(i)
                .map(|f| f.name().to_string())
                .map_err(|e| SigningError::archive(path, e))
        })
        .collect()
}

/// Extract a zip archive into an emptied `dest_dir`.
///
/// When `members` is given, only those members are extracted. Returns the
/// filesystem path of every extracted member, directories included.
pub fn extract_zip(path: &Path, members: Option<&[String]>, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    debug!(
        "extracting {} from {} to {}",
        if members.is_some() { "members" } else { "all members" },
        path.display(),
        dest_dir.display()
    );

    reset_dir(dest_dir)?;

    let mut za = ZipArchive::new(File::open(path)?).map_err(|e| SigningError::archive(path, e))?;

    let mut extracted = vec![];
    let mut found = vec![];

    for i in 0..za.len() {
        let mut zf = za.by_index(i).map_err(|e| SigningError::archive(path, e))?;

        if let Some(members) = members {
            if !members.iter().any(|m| m == zf.name()) {
                continue;
            }
            found.push(zf.name().to_string());
        }

        let rel = zf.enclosed_name().map(|p| p.to_path_buf()).ok_or_else(|| {
            SigningError::archive(
                path,
                format!("member {} would extract outside destination", zf.name()),
            )
        })?;
        let dest_path = dest_dir.join(&rel);

        if zf.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut fh = File::create(&dest_path)?;
            std::io::copy(&mut zf, &mut fh).map_err(|e| SigningError::archive(path, e))?;

            #[cfg(unix)]
            if let Some(mode) = zf.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    &dest_path,
                    std::fs::Permissions::from_mode(mode & 0o7777),
                )?;
            }
        }

        extracted.push(dest_path);
    }

    if let Some(missing) = members
        .unwrap_or(&[])
        .iter()
        .find(|m| !found.contains(*m))
    {
        return Err(SigningError::archive(
            path,
            format!("no member named {}", missing),
        ));
    }

    Ok(extracted)
}

/// Write `files` into the zip archive at `dest`.
///
/// Member names are the file paths relative to `base_dir`. Files are
/// deflated.
pub fn create_zip(dest: &Path, files: &[PathBuf], base_dir: &Path, mode: ZipMode) -> Result<()> {
    info!("creating zipfile {}", dest.display());

    let mut staged = staging_file(dest)?;

    if mode == ZipMode::Append {
        std::io::copy(&mut File::open(dest)?, staged.as_file_mut())
            .map_err(|e| SigningError::archive(dest, e))?;
    }

    {
        let fh = staged.as_file_mut();
        let mut zw = match mode {
            ZipMode::Overwrite => ZipWriter::new(fh),
            ZipMode::Append => ZipWriter::new_append(fh).map_err(|e| SigningError::archive(dest, e))?,
        };

        for path in files {
            let name = match member_name(path, base_dir)? {
                Some(name) => name,
                None => continue,
            };

            let metadata = std::fs::metadata(path).map_err(|e| SigningError::archive(path, e))?;
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                options.unix_permissions(metadata.permissions().mode())
            };

            if metadata.is_dir() {
                zw.add_directory(name, options)
                    .map_err(|e| SigningError::archive(dest, e))?;
            } else {
                let mut fh = File::open(path).map_err(|e| SigningError::archive(path, e))?;
                zw.start_file(name, options)
                    .map_err(|e| SigningError::archive(dest, e))?;
                std::io::copy(&mut fh, &mut zw).map_err(|e| SigningError::archive(dest, e))?;
            }
        }

        zw.finish().map_err(|e| SigningError::archive(dest, e))?;
    }

    persist_staged(staged, dest)
}

fn open_tar(path: &Path, compression: TarCompression) -> Result<tar::Archive<Box<dyn Read>>> {
    Ok(tar::Archive::new(compression.decoder(File::open(path)?)))
}

/// Member names of a tar archive, as stored.
pub fn list_tar(path: &Path, compression: TarCompression) -> Result<Vec<String>> {
    let mut archive = open_tar(path, compression)?;

    let mut names = vec![];
    for entry in archive
        .entries()
        .map_err(|e| SigningError::archive(path, e))?
    {
        let entry = entry.map_err(|e| SigningError::archive(path, e))?;
        names.push(String::from_utf8_lossy(&entry.path_bytes()).to_string());
    }

    Ok(names)
}

/// Extract a tar archive into an emptied `dest_dir`.
///
/// Returns the paths of extracted regular files only.
pub fn extract_tar(path: &Path, compression: TarCompression, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    debug!("extracting {} to {}", path.display(), dest_dir.display());

    reset_dir(dest_dir)?;

    let mut archive = open_tar(path, compression)?;
    archive.set_preserve_permissions(true);

    let mut files = vec![];

    for entry in archive
        .entries()
        .map_err(|e| SigningError::archive(path, e))?
    {
        let mut entry = entry.map_err(|e| SigningError::archive(path, e))?;
        let name = entry
            .path()
            .map_err(|e| SigningError::archive(path, e))?
            .to_path_buf();

        if !entry
            .unpack_in(dest_dir)
            .map_err(|e| SigningError::archive(path, e))?
        {
            return Err(SigningError::archive(
                path,
                format!(
                    "member {} would extract outside destination",
                    name.display()
                ),
            ));
        }

        let dest_path = dest_dir.join(&name);
        if dest_path.is_file() {
            files.push(dest_path);
        }
    }

    Ok(files)
}

fn append_tar_members<W: Write>(
    writer: W,
    files: &[PathBuf],
    base_dir: &Path,
    dest: &Path,
) -> Result<W> {
    let archive_err = |e: std::io::Error| SigningError::archive(dest, e);

    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for path in files {
        let name = match member_name(path, base_dir)? {
            Some(name) => name,
            None => continue,
        };

        let metadata =
            std::fs::symlink_metadata(path).map_err(|e| SigningError::archive(path, e))?;

        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&metadata, tar::HeaderMode::Complete);
        header.set_uid(0);
        header.set_gid(0);
        header.set_username("").map_err(archive_err)?;
        header.set_groupname("").map_err(archive_err)?;

        if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(path).map_err(|e| SigningError::archive(path, e))?;
            header.set_size(0);
            header.set_link_name(target).map_err(archive_err)?;
            builder
                .append_data(&mut header, &name, std::io::empty())
                .map_err(archive_err)?;
        } else if metadata.is_dir() {
            header.set_size(0);
            builder
                .append_data(&mut header, &name, std::io::empty())
                .map_err(archive_err)?;
        } else {
            let fh = File::open(path).map_err(|e| SigningError::archive(path, e))?;
            builder
                .append_data(&mut header, &name, fh)
                .map_err(archive_err)?;
        }
    }

    builder.into_inner().map_err(archive_err)
}

/// Write `files` into a new tar archive at `dest`.
///
/// Member names are the file paths relative to `base_dir`. Directories are
/// added as single members, not recursively.
pub fn create_tar(
    dest: &Path,
    files: &[PathBuf],
    compression: TarCompression,
    base_dir: &Path,
) -> Result<()> {
    info!("creating tarfile {}", dest.display());

    let mut staged = staging_file(dest)?;
    let fh = staged.as_file_mut();

    match compression {
        TarCompression::Gzip => {
            let encoder = flate2::write::GzEncoder::new(fh, flate2::Compression::default());
            append_tar_members(encoder, files, base_dir, dest)?
                .finish()
                .map_err(|e| SigningError::archive(dest, e))?;
        }
        TarCompression::Bzip2 => {
            let encoder = bzip2::write::BzEncoder::new(fh, bzip2::Compression::default());
            append_tar_members(encoder, files, base_dir, dest)?
                .finish()
                .map_err(|e| SigningError::archive(dest, e))?;
        }
    }

    persist_staged(staged, dest)
}

/// Convert a `.dmg` into a sibling `.tar.gz` holding the disk image content.
///
/// The `.dmg` is left in place. Returns the path of the tarball.
pub async fn convert_dmg_to_tar_gz(config: &SigningConfig, path: &Path) -> Result<PathBuf> {
    let dest = PathBuf::from(
        DMG_SUFFIX_RE
            .replace(&path.to_string_lossy(), ".tar.gz")
            .to_string(),
    );

    let abs_source = absolute(path)?;
    let abs_dest = absolute(&dest)?;

    let td = tempfile::Builder::new().prefix("dmg").tempdir()?;
    let app_dir = td.path().join("app");
    std::fs::create_dir(&app_dir)?;

    ExternalCommand::new(&[
        config.dmg.as_str(),
        "extract",
        &abs_source.to_string_lossy(),
        "tmp.hfs",
    ])?
    .dir(td.path())
    .log_level(Level::Debug)
    .run()
    .await?;

    ExternalCommand::new(&[
        config.hfsplus.as_str(),
        "tmp.hfs",
        "extractall",
        "/",
        &app_dir.to_string_lossy(),
    ])?
    .dir(td.path())
    .log_level(Level::Debug)
    .run()
    .await?;

    ExternalCommand::new(&[config.tar.as_str(), "czf", &abs_dest.to_string_lossy(), "."])?
        .dir(&app_dir)
        .run()
        .await?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn write(path: &Path, data: &[u8]) -> PathBuf {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
        path.to_path_buf()
    }

    fn read(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }

    #[test]
    fn compression_from_extension() -> Result<()> {
        assert_eq!(TarCompression::from_extension(".gz")?, TarCompression::Gzip);
        assert_eq!(TarCompression::from_extension("gz")?, TarCompression::Gzip);
        assert_eq!(TarCompression::from_extension(".bz2")?, TarCompression::Bzip2);
        assert!(matches!(
            TarCompression::from_extension(".xz"),
            Err(SigningError::FormatPolicy(_))
        ));

        Ok(())
    }

    #[test]
    fn container_formats() {
        assert_eq!(
            ContainerFormat::from_path(Path::new("target.zip")),
            Some(ContainerFormat::Zip)
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("dir/target.tar.bz2")),
            Some(ContainerFormat::Tar(TarCompression::Bzip2))
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("target.tar.gz")),
            Some(ContainerFormat::Tar(TarCompression::Gzip))
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("target.dmg")),
            Some(ContainerFormat::Dmg)
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("Target.DMG")),
            Some(ContainerFormat::Dmg)
        );
        assert_eq!(ContainerFormat::from_path(Path::new("target.exe")), None);
        assert_eq!(ContainerFormat::from_path(Path::new("dmg")), None);
    }

    #[test]
    fn zip_round_trip() -> Result<()> {
        let td = TempDir::new()?;
        let src = td.path().join("src");
        let files = vec![
            write(&src.join("a.txt"), b"alpha"),
            write(&src.join("sub/b.bin"), &[0u8, 1, 2, 3]),
        ];
        let dest = td.path().join("out.zip");

        create_zip(&dest, &files, &src, ZipMode::Overwrite)?;
        assert_eq!(list_zip(&dest)?, vec!["a.txt", "sub/b.bin"]);

        let out = td.path().join("out");
        write(&out.join("stale.txt"), b"stale");

        let extracted = extract_zip(&dest, None, &out)?;
        assert_eq!(extracted, vec![out.join("a.txt"), out.join("sub/b.bin")]);
        assert_eq!(read(&out.join("a.txt")), b"alpha");
        assert_eq!(read(&out.join("sub/b.bin")), vec![0u8, 1, 2, 3]);
        assert!(!out.join("stale.txt").exists());

        // Overwriting replaces all members.
        create_zip(&dest, &files[1..], &src, ZipMode::Overwrite)?;
        assert_eq!(list_zip(&dest)?, vec!["sub/b.bin"]);

        Ok(())
    }

    #[test]
    fn zip_append() -> Result<()> {
        let td = TempDir::new()?;
        let src = td.path().join("src");
        let a = write(&src.join("a.txt"), b"alpha");
        let sig = write(&src.join("a.txt.sig"), b"signature");
        let dest = td.path().join("out.zip");

        create_zip(&dest, &[a], &src, ZipMode::Overwrite)?;
        create_zip(&dest, &[sig], &src, ZipMode::Append)?;

        assert_eq!(list_zip(&dest)?, vec!["a.txt", "a.txt.sig"]);

        let out = td.path().join("out");
        extract_zip(&dest, None, &out)?;
        assert_eq!(read(&out.join("a.txt")), b"alpha");
        assert_eq!(read(&out.join("a.txt.sig")), b"signature");

        Ok(())
    }

    #[test]
    fn zip_subset_and_directories() -> Result<()> {
        let td = TempDir::new()?;
        let src = td.path().join("src");
        let files = vec![
            src.join("dir"),
            write(&src.join("dir/a.txt"), b"alpha"),
            write(&src.join("b.txt"), b"beta"),
        ];
        let dest = td.path().join("out.zip");

        create_zip(&dest, &files, &src, ZipMode::Overwrite)?;
        assert_eq!(list_zip(&dest)?, vec!["dir/", "dir/a.txt", "b.txt"]);

        let out = td.path().join("out");
        let extracted = extract_zip(&dest, Some(&["b.txt".to_string()]), &out)?;
        assert_eq!(extracted, vec![out.join("b.txt")]);
        assert!(!out.join("dir").exists());

        let extracted = extract_zip(&dest, None, &out)?;
        assert_eq!(extracted.len(), 3);
        assert!(out.join("dir").is_dir());

        assert!(matches!(
            extract_zip(&dest, Some(&["missing".to_string()]), &out),
            Err(SigningError::Archive(_))
        ));

        Ok(())
    }

    #[test]
    fn zip_rejects_traversal() -> Result<()> {
        let td = TempDir::new()?;
        let dest = td.path().join("evil.zip");

        let mut zw = ZipWriter::new(File::create(&dest)?);
        zw.start_file("../evil.txt", FileOptions::default()).unwrap();
        zw.write_all(b"evil")?;
        zw.finish().unwrap();

        let out = td.path().join("out");
        assert!(matches!(
            extract_zip(&dest, None, &out),
            Err(SigningError::Archive(_))
        ));
        assert!(!td.path().join("evil.txt").exists());

        Ok(())
    }

    #[test]
    fn tar_ownership_normalized() -> Result<()> {
        for compression in [TarCompression::Gzip, TarCompression::Bzip2] {
            let td = TempDir::new()?;
            let src = td.path().join("src");
            let files = vec![
                write(&src.join("firefox/firefox"), b"binary"),
                src.join("firefox"),
                write(&src.join("firefox/precomplete"), b"remove \"firefox\"\n"),
            ];
            let dest = td.path().join("target.tar");

            create_tar(&dest, &files, compression, &src)?;

            let mut archive = open_tar(&dest, compression)?;
            let mut count = 0;
            for entry in archive.entries()? {
                let entry = entry?;
                let header = entry.header();
                assert_eq!(header.uid()?, 0);
                assert_eq!(header.gid()?, 0);
                assert!(header.username_bytes().unwrap_or_default().is_empty());
                assert!(header.groupname_bytes().unwrap_or_default().is_empty());
                count += 1;
            }
            assert_eq!(count, 3);

            assert_eq!(
                list_tar(&dest, compression)?,
                vec!["firefox/firefox", "firefox", "firefox/precomplete"]
            );

            let out = td.path().join("out");
            let extracted = extract_tar(&dest, compression, &out)?;
            assert_eq!(
                extracted,
                vec![out.join("firefox/firefox"), out.join("firefox/precomplete")]
            );
            assert!(out.join("firefox").is_dir());
            assert_eq!(read(&out.join("firefox/firefox")), b"binary");
        }

        Ok(())
    }

    #[test]
    fn failed_repack_keeps_original() -> Result<()> {
        let td = TempDir::new()?;
        let src = td.path().join("src");
        let a = write(&src.join("a"), b"alpha");

        let zip = td.path().join("target.zip");
        create_zip(&zip, &[a.clone()], &src, ZipMode::Overwrite)?;
        let tarball = td.path().join("target.tar.gz");
        create_tar(&tarball, &[a.clone()], TarCompression::Gzip, &src)?;

        let zip_before = read(&zip);
        let tar_before = read(&tarball);

        let files = vec![src.join("missing"), a];

        for mode in [ZipMode::Overwrite, ZipMode::Append] {
            assert!(matches!(
                create_zip(&zip, &files, &src, mode),
                Err(SigningError::Archive(msg)) if msg.contains("missing")
            ));
            assert_eq!(read(&zip), zip_before);
        }
        assert_eq!(list_zip(&zip)?, vec!["a"]);

        assert!(matches!(
            create_tar(&tarball, &files, TarCompression::Gzip, &src),
            Err(SigningError::Archive(msg)) if msg.contains("missing")
        ));
        assert_eq!(read(&tarball), tar_before);
        assert_eq!(list_tar(&tarball, TarCompression::Gzip)?, vec!["a"]);

        // No staging files are left behind.
        let mut names = std::fs::read_dir(td.path())?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        assert_eq!(names, vec!["src", "target.tar.gz", "target.zip"]);

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn repack_keeps_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let td = TempDir::new()?;
        let src = td.path().join("src");
        let a = write(&src.join("a"), b"alpha");
        let zip = td.path().join("target.zip");

        create_zip(&zip, &[a.clone()], &src, ZipMode::Overwrite)?;
        std::fs::set_permissions(&zip, std::fs::Permissions::from_mode(0o644))?;
        create_zip(&zip, &[a], &src, ZipMode::Overwrite)?;

        assert_eq!(std::fs::metadata(&zip)?.permissions().mode() & 0o777, 0o644);

        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dmg_converted_to_sibling_tarball() -> Result<()> {
        let td = TempDir::new()?;
        let mut config = SigningConfig::default();
        let log = crate::testutil::fake_dmg_tools(td.path(), &mut config);

        let dmg = write(&td.path().join("pkg/target.dmg"), b"dmg");

        let tarball = convert_dmg_to_tar_gz(&config, &dmg).await?;

        assert_eq!(tarball, td.path().join("pkg/target.tar.gz"));
        assert_eq!(read(&dmg), b"dmg");

        let names = list_tar(&tarball, TarCompression::Gzip)?;
        assert!(names
            .iter()
            .any(|n| n.trim_start_matches("./") == "Firefox.app/Contents/MacOS/firefox"));

        let log = std::fs::read_to_string(&log)?;
        let lines = log
            .lines()
            .map(|l| l.split_whitespace().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);

        // Both tools run in the same scratch directory.
        let scratch = lines[0][1];
        assert_eq!(
            lines[0],
            vec!["dmg", scratch, "extract", dmg.to_str().unwrap(), "tmp.hfs"]
        );
        assert_eq!(
            lines[1][..5],
            ["hfsplus", scratch, "tmp.hfs", "extractall", "/"]
        );
        let app_dir = Path::new(lines[1][5]);
        assert!(app_dir.ends_with("app"));

        // The scratch directory is gone.
        assert!(!app_dir.exists());

        Ok(())
    }

    #[test]
    fn member_outside_base_rejected() {
        let td = TempDir::new().unwrap();
        let outside = write(&td.path().join("outside.txt"), b"x");

        assert!(matches!(
            create_zip(
                &td.path().join("out.zip"),
                &[outside],
                &td.path().join("base"),
                ZipMode::Overwrite
            ),
            Err(SigningError::Archive(_))
        ));
    }
}
