// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem helpers. */

use {
    crate::error::{Result, SigningError},
    log::{info, warn},
    sha2::Digest,
    std::{
        fs::File,
        io::Read,
        path::{Path, PathBuf},
    },
};

/// Copy `source` to `parent_dir/target`, creating parent directories.
///
/// `target` defaults to the file name of `source`. Returns the destination.
pub fn copy_to_dir(source: &Path, parent_dir: &Path, target: Option<&Path>) -> Result<PathBuf> {
    let target = match target {
        Some(target) => target.to_path_buf(),
        None => PathBuf::from(source.file_name().ok_or_else(|| {
            SigningError::Config(format!("{} has no file name", source.display()))
        })?),
    };
    let dest = parent_dir.join(target);

    let copy = || -> std::io::Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if source == dest {
            warn!("{} and {} are the same; skipping", source.display(), dest.display());
        } else {
            info!("copying {} to {}", source.display(), dest.display());
            std::fs::copy(source, &dest)?;
        }

        Ok(())
    };

    copy().map_err(|e| {
        SigningError::Config(format!(
            "can't copy {} to {}: {}",
            source.display(),
            dest.display(),
            e
        ))
    })?;

    Ok(dest)
}

fn hash_file<D: Digest>(path: &Path) -> Result<String> {
    let mut fh = File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = [0u8; 32768];

    loop {
        let count = fh.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 digest of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    hash_file::<sha2::Sha256>(path)
}

/// Hex SHA-512 digest of a file.
pub fn sha512_file(path: &Path) -> Result<String> {
    hash_file::<sha2::Sha512>(path)
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[test]
    fn copy_into_subdirectory() -> Result<()> {
        let td = TempDir::new()?;
        let source = td.path().join("target.zip");
        std::fs::write(&source, b"zip")?;

        let dest = copy_to_dir(&source, &td.path().join("out"), None)?;
        assert_eq!(dest, td.path().join("out/target.zip"));
        assert_eq!(std::fs::read(&dest)?, b"zip");

        let dest = copy_to_dir(
            &source,
            &td.path().join("out"),
            Some(Path::new("public/build/renamed.zip")),
        )?;
        assert_eq!(std::fs::read(dest)?, b"zip");

        // Copying onto itself is a no-op.
        assert_eq!(copy_to_dir(&source, td.path(), None)?, source);

        assert!(matches!(
            copy_to_dir(&td.path().join("missing"), td.path(), Some(Path::new("x"))),
            Err(SigningError::Config(_))
        ));

        Ok(())
    }

    #[test]
    fn digests() -> Result<()> {
        let td = TempDir::new()?;
        let path = td.path().join("empty");
        std::fs::write(&path, b"")?;

        assert_eq!(
            sha256_file(&path)?,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(sha512_file(&path)?.starts_with("cf83e1357eefb8bdf1542850d66d8007"));

        Ok(())
    }
}
