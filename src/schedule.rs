use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

pub mod load;

/// One scheduled stream: a file to broadcast at a local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub file: PathBuf,
    pub scheduled_at: NaiveDateTime,
    pub package_id: String,
}

impl ScheduleEntry {
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without extension, which is what the VOD platform uses as asset title.
    pub fn title(&self) -> String {
        Path::new(&self.file_name())
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Absolute distance between `now` and the scheduled start.
    pub fn time_to_stream(&self, now: NaiveDateTime) -> TimeDelta {
        (now - self.scheduled_at).abs()
    }
}

/// Time-ordered queue of pending entries. Entries only ever leave from the front.
#[derive(Debug, Default, Clone)]
pub struct ScheduleStore {
    entries: VecDeque<ScheduleEntry>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue. Ordering is enforced here as well as in the loader.
    pub fn load(&mut self, mut entries: Vec<ScheduleEntry>) {
        entries.sort_by_key(|entry| entry.scheduled_at);
        self.entries = entries.into();
    }

    pub fn peek_head(&self) -> Option<&ScheduleEntry> {
        self.entries.front()
    }

    pub fn pop_head(&mut self) -> Option<ScheduleEntry> {
        self.entries.pop_front()
    }

    /// Drop every head entry that is already in the past. Used while a job is
    /// running long enough to overrun the following slots.
    pub fn prune_elapsed(&mut self, now: NaiveDateTime) -> bool {
        let before = self.entries.len();
        while self
            .entries
            .front()
            .is_some_and(|entry| entry.scheduled_at < now)
        {
            self.entries.pop_front();
        }

        before != self.entries.len()
    }

    /// Drop head entries whose dispatch window closed without them being dispatched.
    pub fn drop_missed(&mut self, now: NaiveDateTime, window: TimeDelta) -> Vec<ScheduleEntry> {
        let mut missed = Vec::new();
        while self
            .entries
            .front()
            .is_some_and(|entry| now - entry.scheduled_at >= window)
        {
            missed.extend(self.entries.pop_front());
        }

        missed
    }

    pub fn upcoming(&self, count: usize) -> Vec<ScheduleEntry> {
        self.entries.iter().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

    use crate::schedule::{ScheduleEntry, ScheduleStore};

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 6, 21)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn entry(file: &str, scheduled_at: NaiveDateTime) -> ScheduleEntry {
        ScheduleEntry {
            file: format!("/videos/{file}").into(),
            scheduled_at,
            package_id: "pkg".to_string(),
        }
    }

    #[test]
    pub fn test_pop_order() {
        let mut store = ScheduleStore::new();
        store.load(vec![
            entry("c.mp4", at(14, 0)),
            entry("a.mp4", at(12, 0)),
            entry("d.mp4", at(14, 0)),
            entry("b.mp4", at(13, 0)),
        ]);

        let mut popped = Vec::new();
        while let Some(entry) = store.pop_head() {
            popped.push(entry);
        }

        assert_eq!(popped.len(), 4);
        assert!(popped
            .windows(2)
            .all(|pair| pair[0].scheduled_at <= pair[1].scheduled_at));
        assert!(store.peek_head().is_none());
    }

    #[test]
    pub fn test_peek_does_not_remove() {
        let mut store = ScheduleStore::new();
        store.load(vec![entry("a.mp4", at(12, 0))]);

        assert_eq!(store.peek_head().unwrap().file_name(), "a.mp4");
        assert_eq!(store.len(), 1);
    }

    #[test]
    pub fn test_prune_elapsed() {
        let mut store = ScheduleStore::new();
        store.load(vec![
            entry("a.mp4", at(12, 0)),
            entry("b.mp4", at(12, 30)),
            entry("c.mp4", at(13, 0)),
        ]);

        assert!(!store.prune_elapsed(at(11, 0)));
        assert!(store.prune_elapsed(at(12, 45)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.peek_head().unwrap().file_name(), "c.mp4");

        // an entry exactly at `now` is not elapsed yet
        assert!(!store.prune_elapsed(at(13, 0)));
    }

    #[test]
    pub fn test_drop_missed() {
        let mut store = ScheduleStore::new();
        store.load(vec![entry("a.mp4", at(12, 0)), entry("b.mp4", at(13, 0))]);

        let window = TimeDelta::seconds(20);
        assert!(store
            .drop_missed(at(12, 0) + TimeDelta::seconds(19), window)
            .is_empty());

        let missed = store.drop_missed(at(12, 0) + TimeDelta::seconds(20), window);
        assert_eq!(missed, vec![entry("a.mp4", at(12, 0))]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    pub fn test_title_strips_extension() {
        let entry = entry("episode.01.mp4", at(12, 0));
        assert_eq!(entry.file_name(), "episode.01.mp4");
        assert_eq!(entry.title(), "episode.01");
    }
}
