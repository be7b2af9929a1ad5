// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! MAR signing from an Autograph signed hash.

Autograph never sees the MAR. The hash the signature covers is computed
locally over a copy of the MAR carrying a zeroed signature block, and the
returned signature is injected into the same block of a fresh copy.
*/

use {
    crate::{
        autograph::sign_hash_with_autograph,
        config::SigningConfig,
        context::SigningContext,
        error::{Result, SigningError},
        process::ExternalCommand,
        task::split_autograph_format,
    },
    log::info,
    mozilla_mar::{add_signature_block, calculate_hashes, SignatureAlgorithm},
    std::{
        fs::File,
        io::{Seek, SeekFrom},
        path::{Path, PathBuf},
    },
};

/// Public key file names by format and cert type.
const MAR_VERIFY_KEYS: &[(&str, &[(&str, &str)])] = &[
    (
        "autograph_hash_only_mar384",
        &[
            ("release-signing", "release_primary.pem"),
            ("nightly-signing", "nightly_aurora_level3_primary.pem"),
            ("dep-signing", "dep1.pem"),
        ],
    ),
    ("autograph_stage_mar384", &[("dep-signing", "autograph_stage.pem")]),
];

const MAR_ALGORITHM: SignatureAlgorithm = SignatureAlgorithm::Sha384;

/// Public key verifying MARs signed with `format` for `cert_type`.
///
/// An explicit `keyid` selects `<keyid>.pem`. `cert_type` may be the full
/// cert scope; its last `:` segment is used.
pub fn get_mar_verification_key(
    config: &SigningConfig,
    cert_type: &str,
    format: &str,
    keyid: Option<&str>,
) -> Result<PathBuf> {
    let keys_dir = config
        .mar_verify_keys_dir
        .as_ref()
        .ok_or_else(|| SigningError::Config("mar_verify_keys_dir is not configured".into()))?;

    let cert_type = cert_type.rsplit(':').next().unwrap_or(cert_type);

    let filename = match keyid {
        Some(keyid) if keyid.contains('/') => {
            return Err(SigningError::Config(format!(
                "/ not allowed in keyid {}",
                keyid
            )));
        }
        Some(keyid) => format!("{}.pem", keyid),
        None => MAR_VERIFY_KEYS
            .iter()
            .find(|(f, _)| *f == format)
            .and_then(|(_, keys)| keys.iter().find(|(c, _)| *c == cert_type))
            .map(|(_, filename)| filename.to_string())
            .ok_or_else(|| {
                SigningError::Config(format!(
                    "Can't find mar verify key for {}, {}",
                    cert_type, format
                ))
            })?,
    };

    Ok(keys_dir.join(filename))
}

/// Check the signature of a MAR with the external verification tool.
pub async fn verify_mar_signature(
    ctx: &SigningContext,
    format: &str,
    path: &Path,
    keyid: Option<&str>,
) -> Result<()> {
    let key = get_mar_verification_key(&ctx.config, &ctx.cert_type, format, keyid)?;

    ExternalCommand::new(&[
        ctx.config.mar.as_str(),
        "-k",
        &key.to_string_lossy(),
        "-v",
        &path.to_string_lossy(),
    ])?
    .run()
    .await
}

/// Sign a MAR with a sha384 signature block through Autograph.
///
/// `format` may carry a `:keyid` suffix. The signed MAR is written to `to`,
/// defaulting to `from`, and verified. Returns the signed path.
pub async fn sign_mar384_with_autograph_hash(
    ctx: &SigningContext,
    from: &Path,
    format: &str,
    to: Option<&Path>,
) -> Result<PathBuf> {
    let (format, keyid) = split_autograph_format(format);
    ctx.require_suitable_servers(&[format])?;

    let dest = to.unwrap_or(from).to_path_buf();

    let mut placeholder = tempfile::tempfile()?;
    add_signature_block(&mut File::open(from)?, &mut placeholder, MAR_ALGORITHM, None)?;
    placeholder.seek(SeekFrom::Start(0))?;

    let hash = calculate_hashes(&mut placeholder)?
        .into_iter()
        .next()
        .map(|(_, digest)| digest)
        .ok_or_else(|| SigningError::Protocol(format!("no hash computed for {}", from.display())))?;

    let signature = sign_hash_with_autograph(ctx, &hash, format, keyid).await?;

    if signature.len() != MAR_ALGORITHM.signature_length() {
        return Err(SigningError::Protocol(format!(
            "signed mar hash signature has invalid length for hash algo sha384. Got {} expected {}.",
            signature.len(),
            MAR_ALGORITHM.signature_length()
        )));
    }

    // Written aside first: `dest` may be `from`.
    let mut signed = tempfile::NamedTempFile::new_in(ctx.work_dir())?;
    add_signature_block(
        &mut File::open(from)?,
        signed.as_file_mut(),
        MAR_ALGORITHM,
        Some(signature.as_slice()),
    )?;
    std::fs::copy(signed.path(), &dest)?;

    info!("wrote mar with autograph signed hash {} to {}", from.display(), dest.display());

    verify_mar_signature(ctx, format, &dest, keyid).await?;

    Ok(dest)
}
