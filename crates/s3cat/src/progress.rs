//! 📊 progress.rs: "Are we there yet?", now asked once per group.
//!
//! 🚀 Tracks how many groups have been assembled, how many bytes they covered,
//! and how many fell over. The bar counts bytes, since one 4 GiB group and one
//! 12 byte group are not the same amount of waiting.
//!
//! ⚠️ Watching this bar will not make S3 go faster. We checked.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::units::{GIB, KIB, MIB};

/// 📦 Bytes in whatever unit keeps the number readable.
fn format_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// ⏱️ MM:SS, or HH:MM:SS if you should have packed a lunch.
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

#[derive(Debug, Default)]
struct Tally {
    groups_done: u64,
    groups_failed: u64,
    bytes_done: u64,
}

/// 📊 Shared progress for one `grouped_assemble` run.
///
/// Cheap to clone: every group worker holds a handle to the same bar and tally.
#[derive(Clone)]
pub struct AssemblyProgress {
    output_key: Arc<str>,
    total_groups: u64,
    total_bytes: u64,
    tally: Arc<Mutex<Tally>>,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for AssemblyProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar does not do Debug, and printing a terminal widget is a choice anyway
        f.debug_struct("AssemblyProgress")
            .field("output_key", &self.output_key)
            .field("total_groups", &self.total_groups)
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

impl AssemblyProgress {
    /// 🚀 A fresh bar for `total_groups` groups covering `total_bytes` bytes.
    pub fn new(output_key: &str, total_groups: usize, total_bytes: u64) -> Self {
        let progress_bar = ProgressBar::new(total_bytes);
        // -- 🎨 a broken template only costs us the styling, never the run
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
            progress_bar.set_style(style.progress_chars("=>-"));
        }
        Self {
            output_key: Arc::from(output_key),
            total_groups: total_groups as u64,
            total_bytes,
            tally: Arc::new(Mutex::new(Tally::default())),
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// ✅ One group finished, for better or worse. `bytes` is the group's total size.
    pub fn group_finished(&self, bytes: u64, succeeded: bool) {
        let snapshot = {
            // -- 🔒 a poisoned tally still counts; a panicking worker shouldn't freeze the bar
            let mut tally = self.tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            tally.groups_done += 1;
            if !succeeded {
                tally.groups_failed += 1;
            }
            tally.bytes_done = tally.bytes_done.saturating_add(bytes);
            (tally.groups_done, tally.groups_failed, tally.bytes_done)
        };
        self.render(snapshot);
        self.progress_bar.set_position(snapshot.2);
    }

    /// 🏁 Groups finished so far, and how many of those failed.
    pub fn counts(&self) -> (u64, u64) {
        let tally = self.tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (tally.groups_done, tally.groups_failed)
    }

    pub fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 🎨 Two columns, no borders:
    /// ```text
    ///   <groups done / total>   <failed>
    ///   <MiB/s>                 <bytes progress>
    ///   <elapsed>               <remaining>
    /// ```
    fn render(&self, (groups_done, groups_failed, bytes_done): (u64, u64, u64)) {
        let elapsed = self.start_time.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        let mib_per_sec = if elapsed_secs > 0.0 {
            (bytes_done as f64 / elapsed_secs) / MIB as f64
        } else {
            0.0
        };

        let fraction = if self.total_bytes > 0 {
            bytes_done as f64 / self.total_bytes as f64
        } else if self.total_groups > 0 {
            // -- 🫥 all-empty inputs: fall back to counting groups
            groups_done as f64 / self.total_groups as f64
        } else {
            0.0
        };
        let remaining = if fraction > 0.0 && fraction < 1.0 {
            // 🔮 linear extrapolation, assumes the rest of the groups look like these ones
            let remaining_secs = elapsed_secs / fraction - elapsed_secs;
            format_duration(Duration::from_secs_f64(remaining_secs.max(0.0)))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} / {} groups", groups_done, self.total_groups))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} failed", groups_failed)).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {}",
                format_bytes(bytes_done),
                format_bytes(self.total_bytes)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("output: {}\n{}", self.output_key, table));
    }
}
