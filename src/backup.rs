// backup.rs
// Single-use recovery codes: generation, shape checks and constant-time lookup.

use rand::Rng;
use std::collections::HashSet;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

pub const BACKUP_CODE_LENGTH: usize = 10;
pub const DEFAULT_BACKUP_CODE_COUNT: usize = 8;
pub const MAX_BACKUP_CODE_COUNT: usize = 64;

// Uppercase alphanumerics without 0, O, 1, I.
const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate `count` distinct codes from the thread-local CSPRNG.
///
/// A collision inside the batch is discarded and drawn again, so the result
/// always holds exactly `count` unique codes in generation order.
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    let mut rng = rand::rng();
    let mut seen = HashSet::with_capacity(count);
    let mut codes = Vec::with_capacity(count);

    while codes.len() < count {
        let code: String = (0..BACKUP_CODE_LENGTH)
            .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
            .collect();
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }
    codes
}

pub fn is_well_formed_backup_code(code: &str) -> bool {
    code.len() == BACKUP_CODE_LENGTH && code.bytes().all(|b| CHARSET.contains(&b))
}

/// Index of the stored code equal to `submitted`, exact and case-sensitive.
///
/// Every stored code is compared so the scan time does not depend on where
/// (or whether) a match sits.
pub fn find_backup_code(submitted: &str, codes: &[String]) -> Option<usize> {
    let mut found = Choice::from(0u8);
    let mut index = 0u64;
    for (i, code) in codes.iter().enumerate() {
        let hit = code.as_bytes().ct_eq(submitted.as_bytes());
        // keep the first match
        index = u64::conditional_select(&index, &(i as u64), hit & !found);
        found |= hit;
    }
    bool::from(found).then_some(index as usize)
}
