use std::collections::BTreeSet;

/// Orders snapshot refreshes. Every request gets a fresh sequence number and
/// a completed result is applied only if nothing newer has been applied.
#[derive(Debug, Default)]
pub struct RefreshSequencer {
    refresh_seq: u64,
    last_applied_seq: u64,
    outstanding: BTreeSet<u64>,
}

impl RefreshSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> u64 {
        self.refresh_seq += 1;
        self.outstanding.insert(self.refresh_seq);
        self.refresh_seq
    }

    /// Retires `seq` and reports whether its result should be applied. An
    /// accepted result raises the applied watermark.
    pub fn complete(&mut self, seq: u64) -> bool {
        self.outstanding.remove(&seq);
        if !self.should_apply(seq) {
            return false;
        }
        self.last_applied_seq = self.last_applied_seq.max(seq);
        true
    }

    pub fn should_apply(&self, seq: u64) -> bool {
        seq != 0 && seq <= self.refresh_seq && seq >= self.last_applied_seq
    }

    pub fn in_flight(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied_seq
    }

    pub fn latest_requested(&self) -> u64 {
        self.refresh_seq
    }
}
