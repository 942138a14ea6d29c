//! Progress reporting using indicatif.
//!
//! A scan has two phases: [`PHASE_WALKING`] (spinner, unknown total) and
//! [`PHASE_HASHING`] (bar over the collected candidates). The scan loop
//! talks to a [`ProgressCallback`]; [`Progress`] draws it in the terminal
//! and tests can plug in their own recorder.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Directory traversal phase.
pub const PHASE_WALKING: &str = "walking";
/// Cache check, hash and store phase.
pub const PHASE_HASHING: &str = "hashing";

/// Receives progress updates from a scan.
pub trait ProgressCallback: Send + Sync {
    /// A phase started. `total` is 0 when unknown.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Item `current` (1-based) of the active phase is `path`.
    fn on_progress(&self, current: usize, path: &str);

    /// An item of `bytes` size was hashed.
    fn on_item_completed(&self, _bytes: u64) {}

    /// A phase finished.
    fn on_phase_end(&self, phase: &str);

    /// Replace the status line, e.g. with the running counters.
    fn on_message(&self, _message: &str) {}
}

/// Terminal progress bars.
pub struct Progress {
    multi: MultiProgress,
    walking: Mutex<Option<ProgressBar>>,
    hashing: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a reporter. A quiet reporter draws nothing.
    ///
    /// ```
    /// use fileregistry::progress::{Progress, ProgressCallback, PHASE_HASHING};
    ///
    /// let progress = Progress::new(true);
    /// progress.on_phase_start(PHASE_HASHING, 10);
    /// progress.on_phase_end(PHASE_HASHING);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            walking: Mutex::new(None),
            hashing: Mutex::new(None),
            quiet,
        }
    }

    fn walking_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn hashing_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn slot(&self, phase: &str) -> Option<&Mutex<Option<ProgressBar>>> {
        match phase {
            PHASE_WALKING => Some(&self.walking),
            PHASE_HASHING => Some(&self.hashing),
            _ => None,
        }
    }

    /// Run `f` on the most specific active bar.
    fn with_active(&self, f: impl Fn(&ProgressBar)) {
        for slot in [&self.hashing, &self.walking] {
            if let Ok(guard) = slot.lock() {
                if let Some(pb) = guard.as_ref() {
                    f(pb);
                    return;
                }
            }
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }
        let Some(slot) = self.slot(phase) else {
            return;
        };

        let pb = if phase == PHASE_WALKING {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(Self::walking_style());
            pb.set_message("Walking directory");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            let pb = self.multi.add(ProgressBar::new(total as u64));
            pb.set_style(Self::hashing_style());
            pb.set_message("Hashing");
            pb
        };
        if let Ok(mut guard) = slot.lock() {
            *guard = Some(pb);
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        self.with_active(|pb| {
            pb.set_position(current as u64);
            if pb.length().is_none() {
                pb.set_message(truncate_path(path, 40));
            }
        });
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        let Some(slot) = self.slot(phase) else {
            return;
        };
        if let Some(pb) = slot.lock().ok().and_then(|mut guard| guard.take()) {
            pb.finish_and_clear();
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.with_active(|pb| pb.set_message(message.to_string()));
    }
}

/// Shorten a path to its file name when it is longer than `max_len` characters.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let tail: String = file_name
            .chars()
            .skip(name_len.saturating_sub(max_len.saturating_sub(3)))
            .collect();
        return format!("...{}", tail);
    }
    format!(".../{}", file_name)
}
