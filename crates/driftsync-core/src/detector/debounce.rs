//! Per-path event coalescing

use std::collections::BTreeMap;

use crate::models::{FileAction, FileEvent};

#[derive(Debug)]
struct Pending {
    event: FileEvent,
    last_seen: i64,
}

/// Collapses bursts of events on one path into a single event.
///
/// Time is passed in explicitly so callers (and tests) control the clock. A
/// path is released once it has been quiet for the whole window.
#[derive(Debug)]
pub struct Debouncer {
    window_ms: i64,
    pending: BTreeMap<String, Pending>,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            pending: BTreeMap::new(),
        }
    }

    /// Record an event observed at `event.timestamp`.
    pub fn push(&mut self, event: FileEvent) {
        let seen = event.timestamp;
        match self.pending.remove(&event.path) {
            Some(previous) => {
                let merged = collapse(previous.event, event);
                self.pending.insert(
                    merged.path.clone(),
                    Pending {
                        event: merged,
                        last_seen: seen.max(previous.last_seen),
                    },
                );
            }
            None => {
                self.pending.insert(
                    event.path.clone(),
                    Pending {
                        event,
                        last_seen: seen,
                    },
                );
            }
        }
    }

    /// Events whose path has been quiet for the window as of `now`, by path.
    pub fn drain_ready(&mut self, now: i64) -> Vec<FileEvent> {
        let window = self.window_ms;
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_sub(pending.last_seen) >= window)
            .map(|(path, _)| path.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|path| self.pending.remove(&path))
            .map(|pending| pending.event)
            .collect()
    }

    /// Release everything regardless of age.
    pub fn flush(&mut self) -> Vec<FileEvent> {
        std::mem::take(&mut self.pending)
            .into_values()
            .map(|pending| pending.event)
            .collect()
    }

    /// Earliest time at which `drain_ready` will return something.
    pub fn next_deadline(&self) -> Option<i64> {
        self.pending
            .values()
            .map(|pending| pending.last_seen.saturating_add(self.window_ms))
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Combine two events on the same path; `next` happened after `previous`.
fn collapse(previous: FileEvent, next: FileEvent) -> FileEvent {
    use FileAction::{Created, Deleted, Modified, Moved};

    let action = match (previous.action, next.action) {
        // A stray write notification after removal does not resurrect the file
        (Deleted, Modified) => Deleted,
        // Removed and written again: the path still exists with new content
        (Deleted, Created) => Modified,
        // Still new to the store, whatever happened to its content
        (Created, Modified) => Created,
        // Content written at the destination of a move keeps the move
        (Moved, Modified) => Moved,
        (_, action) => action,
    };

    let from = match action {
        Moved => next.from.or(previous.from),
        _ => None,
    };

    FileEvent {
        path: next.path,
        action,
        timestamp: next.timestamp,
        from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ev(path: &str, action: FileAction, at: i64) -> FileEvent {
        FileEvent::new(path, action, at)
    }

    #[test]
    fn burst_collapses_to_last_action() {
        let mut debouncer = Debouncer::new(2_000);
        debouncer.push(ev("a.txt", FileAction::Modified, 0));
        debouncer.push(ev("a.txt", FileAction::Modified, 500));
        debouncer.push(ev("b.txt", FileAction::Created, 600));

        assert!(debouncer.drain_ready(2_400).is_empty());
        let ready = debouncer.drain_ready(2_500);
        assert_eq!(ready, vec![ev("a.txt", FileAction::Modified, 500)]);
        assert_eq!(debouncer.next_deadline(), Some(2_600));
    }

    #[test]
    fn deleted_beats_prior_and_later_modified() {
        let mut debouncer = Debouncer::new(2_000);
        debouncer.push(ev("a.txt", FileAction::Modified, 0));
        debouncer.push(ev("a.txt", FileAction::Deleted, 100));
        debouncer.push(ev("a.txt", FileAction::Modified, 200));

        let ready = debouncer.flush();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].action, FileAction::Deleted);
    }

    #[test]
    fn created_then_deleted_reports_deleted() {
        let mut debouncer = Debouncer::new(2_000);
        debouncer.push(ev("tmp.txt", FileAction::Created, 0));
        debouncer.push(ev("tmp.txt", FileAction::Modified, 10));
        debouncer.push(ev("tmp.txt", FileAction::Deleted, 20));

        assert_eq!(debouncer.flush()[0].action, FileAction::Deleted);
    }

    #[test]
    fn new_file_stays_created_and_replaced_file_is_modified() {
        let mut debouncer = Debouncer::new(2_000);
        debouncer.push(ev("new.txt", FileAction::Created, 0));
        debouncer.push(ev("new.txt", FileAction::Modified, 10));
        debouncer.push(ev("swap.txt", FileAction::Deleted, 20));
        debouncer.push(ev("swap.txt", FileAction::Created, 30));

        assert_eq!(
            debouncer.flush(),
            vec![
                ev("new.txt", FileAction::Created, 10),
                ev("swap.txt", FileAction::Modified, 30),
            ]
        );
    }

    #[test]
    fn move_keeps_source_through_later_writes() {
        let mut debouncer = Debouncer::new(1_000);
        debouncer.push(FileEvent::moved("old.txt", "new.txt", 0));
        debouncer.push(ev("new.txt", FileAction::Modified, 50));

        let ready = debouncer.drain_ready(1_050);
        assert_eq!(ready, vec![FileEvent::moved("old.txt", "new.txt", 50)]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn events_outside_window_are_separate() {
        let mut debouncer = Debouncer::new(100);
        debouncer.push(ev("a.txt", FileAction::Created, 0));
        assert_eq!(debouncer.drain_ready(100).len(), 1);

        debouncer.push(ev("a.txt", FileAction::Modified, 150));
        let ready = debouncer.drain_ready(250);
        assert_eq!(ready[0].action, FileAction::Modified);
    }
}
