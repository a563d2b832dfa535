//! Human-readable sizes and durations for listings.

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// `0 B`, `1.5 KB`, `2 MB`. Base 1024, at most two decimals, trailing zeros
/// dropped.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

/// `m:ss`, or `h:mm:ss` from one hour up. Non-finite or negative input is
/// `0:00`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size_units() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2 * 1024 * 1024), "2 MB");
        assert_eq!(format_file_size(5 * 1024 * 1024 * 1024 * 1024), "5120 GB");
    }

    #[test]
    fn test_format_duration_minutes_and_hours() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(65.9), "1:05");
        assert_eq!(format_duration(3725.0), "1:02:05");
        assert_eq!(format_duration(f64::NAN), "0:00");
        assert_eq!(format_duration(-4.0), "0:00");
    }
}
