//! Small formatting helpers shared by anything that renders a
//! [`crate::item::ItemSnapshot`] for a human (CLI progress bars, log lines).

/// Formats a byte count using binary (KiB/MiB/GiB) units, one decimal place
/// above the smallest unit, matching the precision the helper-process
/// progress parser in [`crate::helper`] expects to read back.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Formats a bytes/sec rate as `"<size>/s"`, or `"-"` when there is nothing
/// to report yet (rate unknown or zero).
pub fn format_rate(bps: u64) -> String {
    if bps == 0 {
        "-".to_string()
    } else {
        format!("{}/s", format_bytes(bps))
    }
}

/// Fraction in `[0.0, 1.0]` for a progress bar, or `None` when the total
/// size is unknown (a progress bar should render indeterminate instead).
pub fn fraction(downloaded: u64, total: Option<u64>) -> Option<f64> {
    let total = total?;
    if total == 0 {
        return Some(1.0);
    }
    Some((downloaded as f64 / total as f64).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_byte_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn formats_rate_with_slash_s() {
        assert_eq!(format_rate(0), "-");
        assert_eq!(format_rate(1024), "1.0 KiB/s");
    }

    #[test]
    fn fraction_caps_at_one_and_handles_unknown_total() {
        assert_eq!(fraction(50, Some(100)), Some(0.5));
        assert_eq!(fraction(150, Some(100)), Some(1.0));
        assert_eq!(fraction(50, None), None);
    }
}
