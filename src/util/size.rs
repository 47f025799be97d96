//! Byte-size helpers for configuration and log messages.

/// Kibibytes to bytes.
#[inline]
pub const fn kb(n: u64) -> u64 {
    n << 10
}

/// Mebibytes to bytes.
#[inline]
pub const fn mb(n: u64) -> u64 {
    n << 20
}

/// Gibibytes to bytes.
#[inline]
pub const fn gb(n: u64) -> u64 {
    n << 30
}

/// Format a byte count with a binary unit, e.g. `"3.50 MiB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GiB", 1 << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)];

    UNITS
        .iter()
        .find(|(_, scale)| bytes >= *scale)
        .map(|(unit, scale)| format!("{:.2} {}", bytes as f64 / *scale as f64, unit))
        .unwrap_or_else(|| format!("{} B", bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_conversions() {
        assert_eq!(kb(1), 1024);
        assert_eq!(mb(4), 4 * 1024 * 1024);
        assert_eq!(gb(1), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(mb(4)), "4.00 MiB");
        assert_eq!(format_bytes(gb(2)), "2.00 GiB");
    }
}
