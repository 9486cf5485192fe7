pub fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// `loaded/total` for a download, or just the percentage when sizes are unknown.
pub fn download_label(progress: f64, loaded: Option<u64>, total: Option<u64>) -> String {
    match (loaded, total) {
        (Some(loaded), Some(total)) if total > 0 => {
            format!("{}/{}", human_bytes(loaded), human_bytes(total))
        }
        _ => format!("{:.0}%", progress),
    }
}

pub fn human_duration(secs: f64) -> String {
    if secs >= 3600.0 {
        format!("{}h{:02}m", (secs / 3600.0) as u64, ((secs % 3600.0) / 60.0) as u64)
    } else if secs >= 60.0 {
        format!("{}m{:02}s", (secs / 60.0) as u64, (secs % 60.0) as u64)
    } else {
        format!("{:.2}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512B");
        assert_eq!(human_bytes(2048), "2.0K");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0M");
    }

    #[test]
    fn test_download_label() {
        assert_eq!(download_label(42.4, None, None), "42%");
        assert_eq!(download_label(50.0, Some(1024), Some(2048)), "1.0K/2.0K");
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(0.16), "0.16s");
        assert_eq!(human_duration(125.0), "2m05s");
        assert_eq!(human_duration(3725.0), "1h02m");
    }
}
