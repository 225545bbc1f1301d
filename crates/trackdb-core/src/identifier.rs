//! Globally distinguishing keys for tracked objects

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::HardwareFingerprint;

/// Key of a tracked object: a random sequence plus the fingerprint of the
/// machine that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    sequence: i32,
    fingerprint: u64,
}

impl Identifier {
    /// Generate a fresh identifier for the current machine
    pub fn new() -> Self {
        Self::with_fingerprint(HardwareFingerprint::current())
    }

    /// Generate a fresh identifier for the given fingerprint
    pub fn with_fingerprint(fingerprint: HardwareFingerprint) -> Self {
        Self {
            sequence: rand::random(),
            fingerprint: fingerprint.as_u64(),
        }
    }

    /// Rebuild an identifier from its parts
    pub const fn from_parts(sequence: i32, fingerprint: u64) -> Self {
        Self {
            sequence,
            fingerprint,
        }
    }

    /// Random part
    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    /// Machine part
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:08x}", self.fingerprint, self.sequence as u32)
    }
}

/// Error returned when parsing an identifier from text
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid identifier '{0}', expected <fingerprint>:<sequence> in hex")]
pub struct ParseIdentifierError(String);

impl FromStr for Identifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseIdentifierError(s.to_string());
        let (fingerprint, sequence) = s.split_once(':').ok_or_else(invalid)?;
        let fingerprint = u64::from_str_radix(fingerprint, 16).map_err(|_| invalid())?;
        let sequence = u32::from_str_radix(sequence, 16).map_err(|_| invalid())?;
        Ok(Self::from_parts(sequence as i32, fingerprint))
    }
}
