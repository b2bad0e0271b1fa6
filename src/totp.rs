// totp.rs
// TOTP utilities: provision Base32 secrets with their otpauth:// URI and verify submitted codes.

use anyhow::Result;
use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::TwoFactorError;

pub const MIN_SECRET_BYTES: usize = 20; // 160 bits
pub const TOTP_DIGITS: usize = 6;
pub const TOTP_STEP_SECONDS: u64 = 30;
pub const MAX_WINDOW_STEPS: u8 = 10;

/// Secret plus the two renderings an authenticator app can import.
#[derive(Debug, Clone)]
pub struct ProvisionedSecret {
    pub secret: String,
    pub provisioning_uri: String,
    pub manual_entry_key: String,
}

/// Build a TOTP instance (SHA1, 6 digits, 30 s) for a Base32 secret.
/// Rejects secrets shorter than 160 bits after decoding.
pub fn build_totp(issuer: Option<&str>, label: &str, base32_secret: &str, skew: u8) -> Result<TOTP> {
    let secret = decode_secret(base32_secret)?;
    let totp = TOTP::new(
        Algorithm::SHA1, // what every authenticator app defaults to
        TOTP_DIGITS,
        skew,
        TOTP_STEP_SECONDS,
        secret,
        issuer.map(str::to_string),
        label.to_string(),
    )?;
    Ok(totp)
}

/// Decode a Base32 (NOPAD) secret and enforce the minimum length.
pub fn decode_secret(base32_secret: &str) -> Result<Vec<u8>> {
    let secret = Secret::Encoded(base32_secret.trim().to_uppercase()).to_bytes()?;
    if secret.len() < MIN_SECRET_BYTES {
        anyhow::bail!(
            "Shared secret too short: {} bytes, need >= {} ({} bits)",
            secret.len(),
            MIN_SECRET_BYTES,
            MIN_SECRET_BYTES * 8
        );
    }
    Ok(secret)
}

/// Generate a random Base32 (NOPAD) secret of `bytes` length.
pub fn generate_base32_secret_n(bytes: usize) -> String {
    let n = bytes.max(MIN_SECRET_BYTES);
    let mut buf = vec![0u8; n];
    rand::rng().fill_bytes(&mut buf);
    BASE32_NOPAD.encode(&buf)
}

/// Fresh secret for `label` (usually the account email) under `issuer`.
/// Pure generation, nothing is stored.
pub fn provision_secret(label: &str, issuer: &str) -> Result<ProvisionedSecret, TwoFactorError> {
    if label.contains(':') || issuer.contains(':') {
        return Err(TwoFactorError::InvalidSetup(
            "issuer and account label must not contain ':'".into(),
        ));
    }

    let secret = generate_base32_secret_n(MIN_SECRET_BYTES);
    let totp = build_totp(Some(issuer), label, &secret, 1)
        .map_err(|e| TwoFactorError::InvalidSetup(e.to_string()))?;

    Ok(ProvisionedSecret {
        provisioning_uri: totp.get_url(),
        manual_entry_key: format_manual_entry_key(&secret),
        secret,
    })
}

/// Groups the secret in blocks of four so it can be typed by hand.
pub fn format_manual_entry_key(secret: &str) -> String {
    secret
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Checks `token` against the current time, accepting `window` steps either side.
pub fn verify(secret: &str, token: &str, window: u8) -> bool {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(now) => verify_at(secret, token, window, now.as_secs()),
        Err(e) => {
            tracing::warn!(error = %e, "system clock before unix epoch, rejecting TOTP");
            false
        }
    }
}

/// Same as [`verify`] at an explicit unix time.
///
/// Malformed tokens and unusable secrets yield `false`. Each candidate code is
/// compared in constant time by `totp-rs`.
pub fn verify_at(secret: &str, token: &str, window: u8, unix_time: u64) -> bool {
    if !is_well_formed_token(token) {
        return false;
    }
    let skew = window.min(MAX_WINDOW_STEPS);
    // the lowest checked step must not underflow
    if unix_time / TOTP_STEP_SECONDS < u64::from(skew) {
        return false;
    }
    match build_totp(None, "", secret, skew) {
        Ok(totp) => totp.check(token, unix_time),
        Err(e) => {
            tracing::warn!(error = %e, "stored TOTP secret unusable");
            false
        }
    }
}

/// The code an authenticator would show at `unix_time`.
pub fn code_at(secret: &str, unix_time: u64) -> Result<String> {
    Ok(build_totp(None, "", secret, 0)?.generate(unix_time))
}

fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOTP_DIGITS && token.bytes().all(|b| b.is_ascii_digit())
}
