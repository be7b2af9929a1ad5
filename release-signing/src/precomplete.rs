// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `precomplete` manifest regeneration and scratch directory cleanup.

A `precomplete` file lists every file and directory an update must remove
before a complete update applies. Adding widevine signatures to a package
changes that list, so the manifest is regenerated after signing and the
change is published as a diff.
*/

use {
    crate::{
        config::SigningConfig,
        error::{Result, SigningError},
        util::copy_to_dir,
    },
    difference::{Changeset, Difference},
    log::{info, warn},
    std::{
        collections::{BTreeSet, HashSet},
        path::{Path, PathBuf},
    },
};

const PRECOMPLETE: &str = "precomplete";

fn glob_under(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        pattern
    );

    let mut paths = vec![];
    for entry in glob::glob(&pattern)
        .map_err(|e| SigningError::Config(format!("bad glob pattern {}: {}", pattern, e)))?
    {
        paths.push(entry.map_err(|e| SigningError::Io(e.into_error()))?);
    }

    Ok(paths)
}

/// Locate the single `precomplete` file anywhere under `dir`.
///
/// `when` describes the regeneration stage for error messages.
pub fn ensure_one_precomplete(dir: &Path, when: &str) -> Result<PathBuf> {
    let mut found = glob_under(dir, &format!("**/{}", PRECOMPLETE))?;

    match found.len() {
        0 => Err(SigningError::FormatPolicy(format!(
            "No `precomplete` file found in \"{}\"",
            dir.display()
        ))),
        1 => Ok(found.remove(0)),
        _ => Err(SigningError::FormatPolicy(format!(
            "More than one `precomplete` file {} in \"{}\"",
            when,
            dir.display()
        ))),
    }
}

fn relative_name(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;

    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Write a fresh `precomplete` for the tree rooted at `dir`.
///
/// When `dir` is the `Resources` directory of a mac bundle, the bundle root
/// two levels up is walked and the manifest lands in `Contents/Resources`.
/// Returns the manifest path.
pub fn generate_precomplete(dir: &Path) -> Result<PathBuf> {
    let (root, manifest) = if dir.file_name().map(|n| n == "Resources").unwrap_or(false) {
        let root = dir
            .parent()
            .and_then(|p| p.parent())
            .ok_or_else(|| {
                SigningError::FormatPolicy(format!("{} is not inside a bundle", dir.display()))
            })?
            .to_path_buf();
        let manifest = root.join("Contents/Resources").join(PRECOMPLETE);
        (root, manifest)
    } else {
        (dir.to_path_buf(), dir.join(PRECOMPLETE))
    };

    // The manifest lists itself.
    std::fs::File::create(&manifest)?;

    let mut files = BTreeSet::new();
    let mut dirs = BTreeSet::new();

    for entry in walkdir::WalkDir::new(&root).min_depth(1) {
        let entry = entry.map_err(|e| SigningError::Io(e.into()))?;

        let rel = match relative_name(entry.path(), &root) {
            Some(rel) => rel,
            None => continue,
        };

        if entry.path().is_dir() {
            let rel = format!("{}/", rel);
            if !rel.contains("distribution/") {
                dirs.insert(rel);
            }
        } else if !(rel.ends_with("channel-prefs.js")
            || rel.ends_with("update-settings.ini")
            || rel.contains("distribution/"))
        {
            files.insert(rel);
        }
    }

    let mut content = String::new();
    for f in files.iter().rev() {
        content.push_str(&format!("remove \"{}\"\n", f));
    }
    for d in dirs.iter().rev() {
        content.push_str(&format!("rmdir \"{}\"\n", d));
    }

    std::fs::write(&manifest, content)?;

    Ok(manifest)
}

/// Line diff of two texts with `"  "`, `"- "` and `"+ "` line prefixes.
pub fn ndiff(before: &str, after: &str) -> String {
    let before = before.lines().collect::<Vec<_>>().join("\n");
    let after = after.lines().collect::<Vec<_>>().join("\n");

    let Changeset { diffs, .. } = Changeset::new(&before, &after, "\n");

    let mut out = String::new();
    for item in diffs {
        let (prefix, text) = match item {
            Difference::Same(ref x) => ("  ", x),
            Difference::Rem(ref x) => ("- ", x),
            Difference::Add(ref x) => ("+ ", x),
        };

        for line in text.lines() {
            out.push_str(&format!("{}{}\n", prefix, line));
        }
    }

    out
}

/// Regenerate the single `precomplete` under `dir` and publish the diff.
///
/// The diff is written to `<work_dir>/precomplete.diff` and copied to
/// `<artifact_dir>/public/logs/precomplete.diff`. Returns the published
/// path.
pub fn run_generate_precomplete(config: &SigningConfig, dir: &Path) -> Result<PathBuf> {
    info!("generating `precomplete` file...");

    let path = ensure_one_precomplete(dir, "before")?;
    let before = std::fs::read_to_string(&path)?;

    let parent = path.parent().unwrap_or(dir);
    generate_precomplete(parent)?;

    let path = ensure_one_precomplete(dir, "after")?;
    let after = std::fs::read_to_string(&path)?;

    let diff_path = config.work_dir.join("precomplete.diff");
    std::fs::write(&diff_path, ndiff(&before, &after))?;

    copy_to_dir(
        &diff_path,
        &config.artifact_dir,
        Some(Path::new("public/logs/precomplete.diff")),
    )
}

/// Delete regular files under `top_dir` that are not in `expected`.
///
/// Returns every unexpected path, directories included; only files are
/// removed.
pub fn remove_extra_files(top_dir: &Path, expected: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let real = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());

    let expected = expected.iter().map(|p| real(p)).collect::<HashSet<_>>();

    let mut extra = glob_under(top_dir, "**/*")?
        .iter()
        .map(|p| real(p))
        .filter(|p| !expected.contains(p))
        .collect::<Vec<_>>();
    extra.sort();
    extra.dedup();

    for path in &extra {
        if path.is_file() {
            warn!("extra file to clean up: {}", path.display());
            std::fs::remove_file(path)?;
        }
    }

    Ok(extra)
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn touch(path: &Path) -> PathBuf {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
        path.to_path_buf()
    }

    fn config(td: &TempDir) -> SigningConfig {
        let config = SigningConfig {
            work_dir: td.path().join("work"),
            artifact_dir: td.path().join("artifacts"),
            ..Default::default()
        };
        std::fs::create_dir_all(&config.work_dir).unwrap();
        config
    }

    #[test]
    fn generate() -> Result<()> {
        let td = TempDir::new()?;
        let root = td.path().join("firefox");
        touch(&root.join("firefox"));
        touch(&root.join("firefox.sig"));
        touch(&root.join("defaults/pref/channel-prefs.js"));
        touch(&root.join("update-settings.ini"));
        touch(&root.join("distribution/extensions/x.xpi"));
        touch(&root.join("gmp/clearkey.so"));

        let manifest = generate_precomplete(&root)?;
        assert_eq!(manifest, root.join("precomplete"));

        assert_eq!(
            std::fs::read_to_string(&manifest)?,
            "remove \"precomplete\"\n\
             remove \"gmp/clearkey.so\"\n\
             remove \"firefox.sig\"\n\
             remove \"firefox\"\n\
             rmdir \"gmp/\"\n\
             rmdir \"defaults/pref/\"\n\
             rmdir \"defaults/\"\n"
        );

        Ok(())
    }

    #[test]
    fn generate_in_bundle() -> Result<()> {
        let td = TempDir::new()?;
        let bundle = td.path().join("Firefox.app");
        touch(&bundle.join("Contents/MacOS/firefox"));
        touch(&bundle.join("Contents/Resources/precomplete"));

        let manifest = generate_precomplete(&bundle.join("Contents/Resources"))?;
        assert_eq!(manifest, bundle.join("Contents/Resources/precomplete"));

        let content = std::fs::read_to_string(&manifest)?;
        assert!(content.contains("remove \"Contents/MacOS/firefox\"\n"));
        assert!(content.contains("remove \"Contents/Resources/precomplete\"\n"));
        assert!(content.contains("rmdir \"Contents/\"\n"));

        Ok(())
    }

    #[test]
    fn diff_prefixes() {
        assert_eq!(
            ndiff("a\nb\nc\n", "a\nc\nd\n"),
            "  a\n- b\n  c\n+ d\n"
        );
        assert_eq!(ndiff("", "a\n"), "+ a\n");
    }

    #[test]
    fn precomplete_count() -> Result<()> {
        let td = TempDir::new()?;
        let config = config(&td);
        let tmp = td.path().join("tmp");

        std::fs::create_dir_all(&tmp)?;
        assert!(matches!(
            run_generate_precomplete(&config, &tmp),
            Err(SigningError::FormatPolicy(msg)) if msg.starts_with("No `precomplete`")
        ));

        touch(&tmp.join("a/precomplete"));
        touch(&tmp.join("b/precomplete"));
        assert!(matches!(
            run_generate_precomplete(&config, &tmp),
            Err(SigningError::FormatPolicy(msg)) if msg.starts_with("More than one `precomplete` file before")
        ));

        Ok(())
    }

    #[test]
    fn regenerate_with_diff() -> Result<()> {
        let td = TempDir::new()?;
        let config = config(&td);
        let tmp = td.path().join("tmp");

        std::fs::create_dir_all(tmp.join("firefox"))?;
        std::fs::write(
            tmp.join("firefox/precomplete"),
            "remove \"precomplete\"\nremove \"firefox\"\n",
        )?;
        touch(&tmp.join("firefox/firefox"));
        touch(&tmp.join("firefox/firefox.sig"));

        let published = run_generate_precomplete(&config, &tmp)?;
        assert_eq!(
            published,
            config.artifact_dir.join("public/logs/precomplete.diff")
        );

        let diff = std::fs::read_to_string(&published)?;
        assert_eq!(
            diff,
            "  remove \"precomplete\"\n+ remove \"firefox.sig\"\n  remove \"firefox\"\n"
        );
        assert_eq!(
            std::fs::read_to_string(config.work_dir.join("precomplete.diff"))?,
            diff
        );

        Ok(())
    }

    #[test]
    fn extra_files_removed() -> Result<()> {
        let td = TempDir::new()?;
        let top = td.path().join("tmp");
        let keep = vec![top.join("dir"), touch(&top.join("dir/keep")), touch(&top.join("a"))];
        let extra = touch(&top.join("dir/extra"));
        let canonical = extra.canonicalize()?;

        let removed = remove_extra_files(&top, &keep)?;

        assert_eq!(removed, vec![canonical]);
        assert!(!extra.exists());
        assert!(top.join("dir/keep").exists());
        assert!(top.join("a").exists());

        Ok(())
    }
}
