// Human-readable sizes, durations and the fixed-width status line shown
// while an upload runs.

use crate::record::UploadRecord;

/// Longest file name shown before it gets truncated.
pub const MAX_TITLE_LEN: usize = 78;
const MIN_TITLE_LEN: usize = 8;
const COLUMN: usize = 7;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// `1023B`, `512K`, `10.0M`, `1.50G`, `2.00T`.
pub fn human_size(n: u64) -> String {
    if n < KIB {
        format!("{n}B")
    } else if n < 1000 * KIB {
        format!("{}K", n / KIB)
    } else if n < 1000 * MIB {
        format!("{:.1}M", n as f64 / MIB as f64)
    } else if n < 1000 * GIB {
        format!("{:.2}G", n as f64 / GIB as f64)
    } else {
        format!("{:.2}T", n as f64 / TIB as f64)
    }
}

/// `42s`, `3m20s`, `5h12m`, `>2d`.
pub fn human_secs(s: u64) -> String {
    if s < 60 {
        format!("{s}s")
    } else if s < 3600 {
        format!("{}m{}s", s / 60, s % 60)
    } else if s < 86_400 {
        format!("{}h{}m", s / 3600, (s % 3600) / 60)
    } else {
        format!(">{}d", s / 86_400)
    }
}

pub fn percent(done: u64, total: u64) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", done as f64 / total as f64 * 100.0)
}

/// Remaining time at the current speed. `---` until a speed is known and
/// exactly `0s` once everything is sent.
pub fn eta(record: &UploadRecord) -> String {
    if record.bytes_finished >= record.total_size {
        return "0s".to_string();
    }
    if record.speed == 0 {
        return "---".to_string();
    }
    human_secs((record.total_size - record.bytes_finished) / record.speed)
}

fn title_width(filename: &str) -> usize {
    filename.chars().count().clamp(MIN_TITLE_LEN, MAX_TITLE_LEN)
}

fn short_name(filename: &str) -> String {
    if filename.chars().count() > MAX_TITLE_LEN {
        let head: String = filename.chars().take(MAX_TITLE_LEN - 3).collect();
        format!("{head}...")
    } else {
        filename.to_string()
    }
}

/// Column titles and the rule under them, sized for `filename`.
pub fn header_lines(filename: &str) -> [String; 2] {
    let width = title_width(filename);
    [
        format!(
            " {:<width$} |  size   |   per   |  speed  |   eta   ",
            "filename"
        ),
        format!(
            "{}+---------+---------+---------+---------",
            "-".repeat(width + 2)
        ),
    ]
}

/// One status row: name, size, percent, speed and ETA.
pub fn progress_line(record: &UploadRecord) -> String {
    let width = title_width(&record.filename);
    format!(
        " {:<width$} | {:>COLUMN$} | {:>COLUMN$} | {:>COLUMN$} | {:>COLUMN$} ",
        short_name(&record.filename),
        human_size(record.total_size),
        percent(record.bytes_finished, record.total_size),
        format!("{}/s", human_size(record.speed)),
        eta(record),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;

    #[test]
    fn sizes() {
        assert_eq!(human_size(0), "0B");
        assert_eq!(human_size(1023), "1023B");
        assert_eq!(human_size(1024), "1K");
        assert_eq!(human_size(999 * 1024), "999K");
        assert_eq!(human_size(1000 * 1024), "1.0M");
        assert_eq!(human_size(10 * MIB), "10.0M");
        assert_eq!(human_size(3 * GIB / 2), "1.50G");
        assert_eq!(human_size(2 * TIB), "2.00T");
    }

    #[test]
    fn durations() {
        assert_eq!(human_secs(0), "0s");
        assert_eq!(human_secs(59), "59s");
        assert_eq!(human_secs(200), "3m20s");
        assert_eq!(human_secs(5 * 3600 + 12 * 60 + 7), "5h12m");
        assert_eq!(human_secs(3 * 86_400), ">3d");
    }

    #[test]
    fn percent_guards_zero_total() {
        assert_eq!(percent(0, 0), "0.0%");
        assert_eq!(percent(1, 3), "33.3%");
        assert_eq!(percent(5, 5), "100.0%");
    }

    #[test]
    fn eta_unknown_until_speed_measured() {
        let mut r = sample_record();
        assert_eq!(eta(&r), "---");
        r.speed = MIB;
        r.bytes_finished = 10 * MIB;
        assert_eq!(eta(&r), "15s");
        r.bytes_finished = r.total_size;
        assert_eq!(eta(&r), "0s");
        r.speed = 0;
        assert_eq!(eta(&r), "0s");
    }

    #[test]
    fn progress_line_columns() {
        let mut r = sample_record();
        r.bytes_finished = 10 * MIB;
        r.speed = 2 * MIB;
        assert_eq!(
            progress_line(&r),
            " video.mkv |   25.0M |   40.0% |  2.0M/s |      7s "
        );
    }

    #[test]
    fn header_matches_line_width() {
        let r = sample_record();
        let [titles, rule] = header_lines(&r.filename);
        assert_eq!(titles.chars().count(), progress_line(&r).chars().count());
        assert_eq!(rule.chars().count(), titles.chars().count());
    }

    #[test]
    fn long_names_are_truncated() {
        let mut r = sample_record();
        r.filename = "x".repeat(100);
        let line = progress_line(&r);
        assert!(line.starts_with(&format!(" {}... |", "x".repeat(MAX_TITLE_LEN - 3))));
    }
}
