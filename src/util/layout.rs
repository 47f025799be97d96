//! Alignment arithmetic shared by the sub-allocators and the copy splitter.

/// Align `value` up to `align`, which must be a power of two.
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to `align`, which must be a power of two.
#[inline]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Check whether `value` is a multiple of the power-of-two `align`.
#[inline]
pub const fn is_aligned(value: u64, align: u64) -> bool {
    value & (align - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 512), 0);
        assert_eq!(align_up(1, 512), 512);
        assert_eq!(align_up(512, 512), 512);
        assert_eq!(align_up(513, 256), 768);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(300, 512), 0);
        assert_eq!(align_down(1023, 512), 512);
        assert_eq!(align_down(1024, 512), 1024);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(0, 512));
        assert!(is_aligned(768, 256));
        assert!(!is_aligned(300, 256));
    }
}
