//! 📊 progress.rs: "Are we there yet?" Every upload, every time, forever.
//!
//! 🚀 Answers the age-old question: "how fast is the throttle letting us go?"
//! With cold hard numbers, a progress bar, and a table so comfy it has lumbar support.
//!
//! ⚠️  Warning: Watching this progress bar will not make it go faster.
//! That's literally the point. There's a token bucket. It said no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

// -- 📏 one mebibyte, not a megabyte, pedants. there's a difference and I will die on this hill.
const MIB: u64 = 1024 * 1024;

// -- 🔄 how far back the rate window looks. short enough to react, long enough not to twitch.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Converts raw bytes into a human-readable string scaled to the total file size.
/// Because "1073741824 bytes" is a war crime in a UI.
fn format_bytes(bytes: u64, file_size: u64) -> String {
    if file_size >= 512 * MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if file_size >= MIB {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        // -- 🐛 raw bytes mode. small files need love too.
        format!("{} bytes", bytes)
    }
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, your throttle is doing its job. Maybe too well.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 🔮 Time left, by linear extrapolation. With a token bucket in charge, this is actually accurate.
/// Anything unknowable (nothing sent yet, an ETA past the heat death of the universe) is `--:--`.
fn format_remaining(elapsed: Duration, percent: f64) -> String {
    if percent <= 0.0 {
        return "--:--".to_string();
    }
    let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
    let remaining_secs = total_estimated - elapsed.as_secs_f64();
    match Duration::try_from_secs_f64(remaining_secs) {
        Ok(remaining) if !remaining.is_zero() => format_duration(remaining),
        _ => "--:--".to_string(),
    }
}

/// 📡 A snapshot of throughput at any given moment.
struct Rates {
    /// 📦 MiB/s actually making it past the bucket (the real metric)
    mib_per_sec: f64,
    /// 📊 percent of the file per second (the anxiety metric)
    percent_per_sec: f64,
}

/// 📊 Tracks bytes pushed, rates, and the terminal bar that shows them off.
///
/// # Ancient Proverb
/// "He who uploads a 200 GB file without a progress bar, uploads alone and in darkness."
pub(crate) struct UploadProgress {
    /// 🏷️ what are we shipping? shows up in the bar message
    label: String,
    /// 📏 total bytes expected
    total_size: u64,
    total_bytes: u64,
    progress_bar: ProgressBar,
    /// 🔄 sliding window of (timestamp, bytes). VecDeque because we pop from the front
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for UploadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't do Debug the way we'd like
        f.debug_struct("UploadProgress")
            .field("label", &self.label)
            .field("total_size", &self.total_size)
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

impl UploadProgress {
    /// 🚀 A progress tracker drawing to the terminal, or to nowhere when `visible` is false.
    pub(crate) fn new(label: String, total_size: u64, visible: bool) -> Self {
        let progress_bar = if visible {
            let bar = ProgressBar::new(total_size);
            // -- 🐛 template is a hardcoded literal; if it doesn't parse we just keep the default style
            if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        let start_time = Instant::now();
        // -- 🔄 seed the window with t=0 so we don't divide by zero like animals
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            label,
            total_size,
            total_bytes: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Feed in another chunk that made it through the throttle.
    pub(crate) fn update(&mut self, bytes: u64) {
        self.total_bytes += bytes;
        let rates = self.calculate_rates();
        self.render(rates);
        self.progress_bar.set_position(self.total_bytes);
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// ✅ Done. Ring the bell.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 🗑️ Not done, but not coming back either. Leave the bar where it died.
    pub(crate) fn abandon(&self) {
        self.progress_bar.abandon();
    }

    /// 📈 Rates over the sliding window, so one slow wait doesn't look like the end of days.
    fn calculate_rates(&mut self) -> Rates {
        let now = Instant::now();
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.total_bytes));

        if let Some(&(oldest_time, oldest_bytes)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                let bytes_delta = self.total_bytes.saturating_sub(oldest_bytes);
                let percent_delta = if self.total_size > 0 {
                    (bytes_delta as f64 / self.total_size as f64) * 100.0
                } else {
                    0.0
                };
                return Rates {
                    mib_per_sec: (bytes_delta as f64 / elapsed) / MIB as f64,
                    percent_per_sec: percent_delta / elapsed,
                };
            }
        }

        // -- 💤 not enough elapsed time yet, return zeros and maintain composure
        Rates {
            mib_per_sec: 0.0,
            percent_per_sec: 0.0,
        }
    }

    /// 🎨 Layout:
    /// ```text
    /// upload: <label>
    ///   <MiB/s>      <bytes progress>
    ///   <%/s>        <%>
    ///   <elapsed>    <remaining>
    /// | [=====>----------]
    /// ```
    fn render(&self, rates: Rates) {
        let percent = if self.total_size > 0 {
            (self.total_bytes as f64 / self.total_size as f64) * 100.0
        } else {
            0.0
        };

        let elapsed = self.start_time.elapsed();
        let remaining = format_remaining(elapsed, percent);

        let bytes_progress = format!(
            "{} / {}",
            format_bytes(self.total_bytes, self.total_size),
            format_bytes(self.total_size, self.total_size)
        );

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(bytes_progress).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} %/s", rates.percent_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}%", percent)).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("upload: {}\n{}", self.label, table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_units_scale_with_the_file() {
        assert_eq!(format_bytes(512, 1000), "512 bytes");
        assert_eq!(format_bytes(2048, 4 * MIB), "2.00 KiB");
        assert_eq!(format_bytes(3 * MIB, 1024 * MIB), "3.00 MiB");
    }

    #[test]
    fn the_one_where_long_uploads_earn_an_hours_column() {
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 62)), "03:01:02");
    }

    #[test]
    fn the_one_where_the_eta_gives_up_gracefully() {
        assert_eq!(format_remaining(Duration::from_secs(30), 50.0), "00:30");
        assert_eq!(format_remaining(Duration::from_secs(30), 0.0), "--:--");
        assert_eq!(format_remaining(Duration::from_secs(30), 100.0), "--:--");
        assert_eq!(format_remaining(Duration::from_secs(30), 1e-300), "--:--");
    }

    #[test]
    fn the_one_where_a_hidden_bar_still_keeps_count() {
        let mut progress = UploadProgress::new("s3://bucket/key".to_string(), 100, false);
        progress.update(40);
        progress.update(60);
        assert_eq!(progress.total_bytes(), 100);
        progress.finish();
    }
}
