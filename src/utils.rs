use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use range_parser::parse;

/// Parse GPU indices from string inputs, supporting ranges like "0-2" or
/// comma-separated "0,1,2". The CLI resolves these against the resource
/// listing to obtain uuids.
///
/// # Examples
///
/// ```
/// use gpool::utils::parse_gpu_indices;
///
/// assert_eq!(parse_gpu_indices("0").unwrap(), vec![0]);
/// assert_eq!(parse_gpu_indices("0,2,4").unwrap(), vec![0, 2, 4]);
/// assert_eq!(parse_gpu_indices("0-2").unwrap(), vec![0, 1, 2]);
/// assert_eq!(parse_gpu_indices("0-1,3").unwrap(), vec![0, 1, 3]);
/// ```
pub fn parse_gpu_indices(gpu_string: &str) -> Result<Vec<u32>> {
    let mut parsed: Vec<u32> = parse::<u32>(gpu_string.trim())
        .context(format!("Invalid GPU index or range: {}", gpu_string))?;

    parsed.sort_unstable();
    parsed.dedup();

    Ok(parsed)
}

/// Time remaining until `deadline`, as `HH:MM` for display, or `"expired"`
/// once the deadline has passed.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use gpool::utils::format_remaining;
///
/// let soon = Utc::now() + Duration::minutes(90);
/// assert_eq!(format_remaining(&soon), "01:29");
/// let past = Utc::now() - Duration::minutes(1);
/// assert_eq!(format_remaining(&past), "expired");
/// ```
pub fn format_remaining(deadline: &DateTime<Utc>) -> String {
    let remaining = *deadline - Utc::now();
    let total_mins = remaining.num_minutes();
    if total_mins < 0 {
        return "expired".to_string();
    }
    format!("{:02}:{:02}", total_mins / 60, total_mins % 60)
}

pub const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpu_indices_single() {
        assert_eq!(parse_gpu_indices("0").unwrap(), vec![0]);
        assert_eq!(parse_gpu_indices("5").unwrap(), vec![5]);
    }

    #[test]
    fn test_parse_gpu_indices_mixed() {
        assert_eq!(parse_gpu_indices("0-1,3").unwrap(), vec![0, 1, 3]);
        // Unsorted input gets sorted, duplicates removed
        assert_eq!(parse_gpu_indices("3,1,2").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_gpu_indices("0-2,1-3").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_gpu_indices_invalid() {
        assert!(parse_gpu_indices("").is_err());
        assert!(parse_gpu_indices("abc").is_err());
        assert!(parse_gpu_indices("-1").is_err());
    }

    #[test]
    fn test_format_remaining() {
        use chrono::Duration;
        let deadline = Utc::now() + Duration::hours(2) + Duration::minutes(31);
        assert_eq!(format_remaining(&deadline), "02:30");
        assert_eq!(
            format_remaining(&(Utc::now() - Duration::hours(1))),
            "expired"
        );
    }
}
