//! Tunables named in spec §6. Loading these from a file or environment is an
//! external collaborator's job (spec §1); this module only owns the values
//! and validates them.

use crate::error::{CoreError, CoreResult};

/// The platform's `IOV_MAX`. No `libc` dependency is pulled in just to read
/// `sysconf(_SC_IOV_MAX)`; 1024 is the common Linux default and is only ever
/// used as the upper operand of `min(IOV_MAX, 128)` (spec §6), so the exact
/// value above 128 is immaterial.
const IOV_MAX_PLATFORM: usize = 1024;

/// A 128-entry cap regardless of platform (spec §4.H / §6).
pub const IOV_HARD_CAP: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    /// `MBUF_CAP`: the normal writable capacity of an mbuf, in bytes.
    pub mbuf_cap: usize,
    /// Extra padding beyond `mbuf_cap` reserved for ciphertext staging
    /// (`[end, end_extra)` in spec §3).
    pub mbuf_extra: usize,
    /// Cap on live mbufs the mbuf pool will allocate (spec §5: "Buffers:
    /// delegated to an mbuf pool with its own cap").
    pub mbuf_pool_max: usize,
    /// `MAX_ALLOC_MSGS`: hard ceiling on live messages.
    pub max_alloc_msgs: usize,
    /// `ALLOWED_ALLOC_MSGS`: soft ceiling above which only internal-mode
    /// allocations succeed.
    pub allowed_alloc_msgs: usize,
    /// Default `server_timeout_ms` used when a connection does not override
    /// it.
    pub server_timeout_ms: u64,
}

impl CoreConfig {
    /// `IOV_MAX_CAP = min(IOV_MAX, 128)` (spec §6).
    pub fn iov_max_cap(&self) -> usize {
        IOV_MAX_PLATFORM.min(IOV_HARD_CAP)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.allowed_alloc_msgs > self.max_alloc_msgs {
            return Err(CoreError::InvalidConfig(
                "allowed_alloc_msgs must not exceed max_alloc_msgs",
            ));
        }
        if self.mbuf_cap == 0 {
            return Err(CoreError::InvalidConfig("mbuf_cap must be nonzero"));
        }
        if self.max_alloc_msgs == 0 {
            return Err(CoreError::InvalidConfig("max_alloc_msgs must be nonzero"));
        }
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            mbuf_cap: 16 * 1024,
            mbuf_extra: 1024,
            mbuf_pool_max: 8192,
            max_alloc_msgs: 200_000,
            allowed_alloc_msgs: 180_000,
            server_timeout_ms: 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        CoreConfig::default().validate().unwrap();
    }

    #[test]
    fn soft_ceiling_above_hard_ceiling_is_rejected() {
        let cfg = CoreConfig {
            allowed_alloc_msgs: 10,
            max_alloc_msgs: 5,
            ..CoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn iov_cap_is_never_above_128() {
        assert!(CoreConfig::default().iov_max_cap() <= IOV_HARD_CAP);
    }
}
