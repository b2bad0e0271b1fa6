// lib.rs
// Two-factor authentication for the marketplace: TOTP enrollment and verification,
// single-use backup codes, and the login policy that decides who must use them.

pub mod backup;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod policy;
pub mod routes;
pub mod service;
pub mod settings;
pub mod state;
pub mod totp;

pub use error::{Result, TwoFactorError};
pub use service::{TwoFactorService, VerificationMethod};
