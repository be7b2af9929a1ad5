// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared test fixtures.

use {
    crate::{
        config::SigningConfig, context::SigningContext, error::Result, retry::RetryPolicy,
        server::ServerPool,
    },
    std::path::{Path, PathBuf},
    tempfile::TempDir,
};

pub const CERT: &str = "project:releng:signing:cert:dep-signing";

/// Server pool YAML for the dep-signing cert from `(server-type, urls, formats)`.
pub fn pool_yaml(pools: &[(&str, &[&str], &[&str])]) -> String {
    let mut yaml = format!("{}:\n", CERT);

    for (i, (server_type, urls, formats)) in pools.iter().enumerate() {
        yaml.push_str(&format!(
            "  pool{}:\n    urls: [{}]\n    user: user\n    pass: secret\n    formats: [{}]\n    server-type: {}\n",
            i,
            urls.iter().map(|u| format!("\"{}\"", u)).collect::<Vec<_>>().join(", "),
            formats.join(", "),
            server_type
        ));
    }

    yaml
}

pub fn autograph_pool(url: &str, formats: &[&str]) -> String {
    pool_yaml(&[("autograph", &[url], formats)])
}

/// A context rooted in a temporary directory with `work_dir` and
/// `artifact_dir` created.
pub fn context(td: &TempDir, pool: &str) -> Result<SigningContext> {
    let config = SigningConfig {
        work_dir: td.path().join("work"),
        artifact_dir: td.path().join("artifacts"),
        ..Default::default()
    };
    std::fs::create_dir_all(&config.work_dir)?;
    std::fs::create_dir_all(&config.artifact_dir)?;

    let mut ctx = SigningContext::new(config, ServerPool::from_yaml(pool)?, CERT)?;
    ctx.retry = RetryPolicy::immediate(3);

    Ok(ctx)
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\nset -e\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    path
}

/// A signtool stand-in recording its arguments in `<dir>/signtool.log` and
/// appending ` signed` to the output file.
#[cfg(unix)]
pub fn fake_signtool(dir: &Path) -> PathBuf {
    let log = dir.join("signtool.log");

    fake_tool(
        dir,
        "signtool",
        &format!(
            "echo \"$@\" >> \"{}\"\n\
             while [ $# -gt 2 ]; do shift; done\n\
             if [ \"$1\" != \"$2\" ]; then cp \"$2\" \"$1\"; fi\n\
             printf ' signed' >> \"$1\"",
            log.display()
        ),
    )
}

/// `dmg` and `hfsplus` stand-ins. Each logs `<tool> <cwd> <args>` to
/// `<dir>/dmg.log`; `hfsplus extractall` fills the destination with a
/// small application bundle.
#[cfg(unix)]
pub fn fake_dmg_tools(dir: &Path, config: &mut SigningConfig) -> PathBuf {
    let log = dir.join("dmg.log");

    config.dmg = fake_tool(
        dir,
        "dmg",
        &format!(
            "echo \"dmg $(pwd) $@\" >> \"{}\"\nprintf hfs > \"$3\"",
            log.display()
        ),
    )
    .to_string_lossy()
    .to_string();

    config.hfsplus = fake_tool(
        dir,
        "hfsplus",
        &format!(
            "echo \"hfsplus $(pwd) $@\" >> \"{}\"\n\
             mkdir -p \"$4/Firefox.app/Contents/MacOS\"\n\
             printf binary > \"$4/Firefox.app/Contents/MacOS/firefox\"",
            log.display()
        ),
    )
    .to_string_lossy()
    .to_string();

    log
}
