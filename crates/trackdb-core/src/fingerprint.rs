//! Machine fingerprint
//!
//! A 16-byte digest of stable host properties. The first eight bytes feed
//! [`Identifier`](crate::Identifier) generation; the full value is the key of the
//! encrypted storage format.

use std::fmt;

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use sysinfo::System;
use tracing::debug;

static CURRENT: Lazy<HardwareFingerprint> = Lazy::new(HardwareFingerprint::probe);

/// Fingerprint of the machine the process runs on
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareFingerprint([u8; 16]);

impl HardwareFingerprint {
    /// Fingerprint of the current machine (computed once per process)
    pub fn current() -> Self {
        *CURRENT
    }

    /// Build a fingerprint from raw bytes
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw fingerprint bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The 64-bit form stored in identifiers
    pub fn as_u64(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(head)
    }

    /// Hex rendering of the fingerprint
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn probe() -> Self {
        let machine_id = std::fs::read_to_string("/etc/machine-id")
            .ok()
            .map(|id| id.trim().to_string());
        let parts = [
            System::host_name(),
            System::name(),
            System::kernel_version(),
            Some(std::env::consts::ARCH.to_string()),
            machine_id,
        ];

        let mut hasher = Sha256::new();
        for part in &parts {
            hasher.update(part.as_deref().unwrap_or("unknown").as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        let fingerprint = Self(bytes);
        debug!("Machine fingerprint computed: {}", fingerprint.to_hex());
        fingerprint
    }
}

// The fingerprint doubles as a key, keep it out of debug output.
impl fmt::Debug for HardwareFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareFingerprint({:016x})", self.as_u64())
    }
}
