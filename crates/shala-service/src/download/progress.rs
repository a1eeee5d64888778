use std::fmt;
use std::sync::Arc;

/// A callback receiving the download progress as an integer percentage.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Tracks received bytes against the announced total and reports percentages.
///
/// Reported values never decrease. `100` is only reported by [`finish`](Self::finish), exactly
/// once. If the total is unknown nothing is reported before that.
pub(crate) struct Progress {
    callback: Option<ProgressFn>,
    total: Option<u64>,
    received: u64,
    last: Option<u8>,
}

impl Progress {
    pub fn new(callback: Option<ProgressFn>, total: Option<u64>) -> Self {
        Self {
            callback,
            // a zero length would make every chunk 100%
            total: total.filter(|total| *total > 0),
            received: 0,
            last: None,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Accounts for a received chunk.
    pub fn advance(&mut self, chunk_len: usize) {
        self.received += chunk_len as u64;
        let Some(total) = self.total else {
            return;
        };

        let percent = (self.received.saturating_mul(100) / total).min(100) as u8;
        let percent = self.last.map_or(percent, |last| percent.max(last));
        if percent < 100 {
            self.report(percent);
        }
    }

    /// Marks the transfer as complete and usable.
    pub fn finish(&mut self) {
        if self.last != Some(100) {
            self.report(100);
        }
    }

    fn report(&mut self, percent: u8) {
        self.last = Some(percent);
        if let Some(callback) = &self.callback {
            callback(percent);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("total", &self.total)
            .field("received", &self.received)
            .field("last", &self.last)
            .finish()
    }
}
