//! Formatting utilities for race data display.

/// Format a duration in milliseconds as `180ms` below one second, `2.05s` above.
pub fn format_time(ms: i64) -> String {
    let ms = ms.max(0);
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.2}s", ms as f64 / 1000.0)
    }
}

/// Format a speed ratio as `10.0x`.
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.1}x", ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_millis() {
        assert_eq!(format_time(180), "180ms");
    }

    #[test]
    fn test_format_time_seconds() {
        assert_eq!(format_time(2050), "2.05s");
        assert_eq!(format_time(1000), "1.00s");
    }

    #[test]
    fn test_format_time_negative() {
        // Edge case: clock skew between feeds
        assert_eq!(format_time(-40), "0ms");
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(9.96), "10.0x");
    }
}
