//! Acquisition-buffer partitioning
//!
//! The MCU's sample RAM is split three ways: chirp playback, right-ear
//! listen capture, left-ear listen capture. An invalid split is replaced
//! by the partition the MCU applies on reset, so host and device always
//! agree on a known state instead of erroring out.

/// Total sample budget across all three regions (RAM limited)
pub const MAX_BUFFER_LENGTH: u32 = 65_536;
/// Largest single region: one DMA descriptor carries at most u16::MAX
pub const MAX_DESCRIPTOR_LENGTH: u32 = 65_535;

/// Reset-default chirp region length, samples
pub const DEFAULT_CHIRP_LEN: u32 = 3_000;
/// Reset-default per-ear listen length, samples
pub const DEFAULT_LISTEN_LEN: u32 = 10_000;

/// A validated three-way acquisition-buffer split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Whether the requested split was accepted (false: this is the
    /// hardware default substituted for an invalid request)
    pub accepted: bool,
    /// Total samples: chirp + both listen regions
    pub n: u32,
    /// Listen samples across both ears
    pub n_listen: u32,
    /// Chirp region length
    pub chirp_len: u32,
    /// Right-ear listen length
    pub listen_right_len: u32,
    /// Left-ear listen length
    pub listen_left_len: u32,
}

/// The partition the MCU applies on reset
pub const PARTITION_DEFAULT: Partition = Partition {
    accepted: false,
    n: DEFAULT_CHIRP_LEN + 2 * DEFAULT_LISTEN_LEN,
    n_listen: 2 * DEFAULT_LISTEN_LEN,
    chirp_len: DEFAULT_CHIRP_LEN,
    listen_right_len: DEFAULT_LISTEN_LEN,
    listen_left_len: DEFAULT_LISTEN_LEN,
};

/// Validate a requested split, falling back to the hardware default
///
/// Rejection is silent by design: the MCU resets to the default partition
/// on any invalid request, and raising here would leave host cache and
/// device state disagreeing.
pub fn check_partition(chirp_len: u32, right_len: u32, left_len: u32) -> Partition {
    let n_listen = right_len + left_len;
    let n = n_listen + chirp_len;

    if n > MAX_BUFFER_LENGTH {
        return PARTITION_DEFAULT;
    }

    if chirp_len > MAX_DESCRIPTOR_LENGTH
        || right_len > MAX_DESCRIPTOR_LENGTH
        || left_len > MAX_DESCRIPTOR_LENGTH
    {
        return PARTITION_DEFAULT;
    }

    Partition {
        accepted: true,
        n,
        n_listen,
        chirp_len,
        listen_right_len: right_len,
        listen_left_len: left_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_partition() {
        let p = check_partition(3000, 10000, 10000);
        assert!(p.accepted);
        assert_eq!(p.n, 23_000);
        assert_eq!(p.n_listen, 20_000);
        assert_eq!(p.chirp_len, 3_000);
        assert_eq!(p.listen_right_len, 10_000);
        assert_eq!(p.listen_left_len, 10_000);
    }

    #[test]
    fn test_sum_overflow_falls_back() {
        let p = check_partition(40_000, 40_000, 40_000);
        assert_eq!(p, PARTITION_DEFAULT);
        assert!(!p.accepted);
    }

    #[test]
    fn test_descriptor_overflow_falls_back() {
        // Each region alone must fit one descriptor, checked per region.
        // 65_536 samples in one region also trips the total budget, so
        // the descriptor bound is only reachable when the others are 0.
        assert_eq!(check_partition(65_536, 0, 0), PARTITION_DEFAULT);
        assert_eq!(check_partition(0, 65_536, 0), PARTITION_DEFAULT);
        assert_eq!(check_partition(0, 0, 65_536), PARTITION_DEFAULT);
    }

    #[test]
    fn test_boundary_accepted() {
        let p = check_partition(MAX_DESCRIPTOR_LENGTH, 1, 0);
        assert!(p.accepted);
        assert_eq!(p.n, MAX_BUFFER_LENGTH);
    }

    #[test]
    fn test_zero_listen_accepted() {
        let p = check_partition(3000, 0, 0);
        assert!(p.accepted);
        assert_eq!(p.n_listen, 0);
    }
}
