//! Reconciles confirmed local changes with store fetches that resolve out
//! of order

use tracing::debug;

/// A change the store has confirmed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Change<T, K> {
    Upsert(T),
    Remove(K),
}

/// Orders fetches and confirmed changes on one clock.
///
/// Every fetch gets a ticket. A change confirmed while a fetch is in flight
/// is recorded, and replayed onto any fetch result issued before it, since
/// the store may have served that fetch without the change.
#[derive(Debug)]
pub(crate) struct FetchJournal<T, K> {
    clock: u64,
    latest: u64,
    applied: u64,
    changes: Vec<(u64, Change<T, K>)>,
}

impl<T, K> Default for FetchJournal<T, K> {
    fn default() -> Self {
        Self {
            clock: 0,
            latest: 0,
            applied: 0,
            changes: Vec::new(),
        }
    }
}

impl<T: Clone, K: PartialEq> FetchJournal<T, K> {
    /// Ticket for a new fetch
    pub fn issue(&mut self) -> u64 {
        self.clock += 1;
        self.latest = self.clock;
        self.latest
    }

    fn in_flight(&self) -> bool {
        self.latest > self.applied
    }

    pub fn is_latest(&self, ticket: u64) -> bool {
        ticket == self.latest
    }

    /// Record a confirmed change if a fetch could still miss it
    pub fn record(&mut self, change: Change<T, K>) {
        if self.in_flight() {
            self.clock += 1;
            self.changes.push((self.clock, change));
        }
    }

    /// Merge a successful fetch into `items`.
    ///
    /// Returns false when a newer fetch has already been applied.
    pub fn settle(
        &mut self,
        ticket: u64,
        fetched: Vec<T>,
        items: &mut Vec<T>,
        key: impl Fn(&T) -> &K,
    ) -> bool {
        if ticket < self.applied {
            debug!(ticket, applied = self.applied, "Ignoring fetch older than the applied one");
            return false;
        }
        *items = fetched;
        self.replay(ticket, items, key);
        true
    }

    /// Empty `items` after a failed fetch, keeping changes confirmed since.
    ///
    /// Returns false for a failure superseded by a newer fetch.
    pub fn fail(&mut self, ticket: u64, items: &mut Vec<T>, key: impl Fn(&T) -> &K) -> bool {
        if ticket < self.latest {
            debug!(ticket, latest = self.latest, "Ignoring failure of a superseded fetch");
            return false;
        }
        items.clear();
        self.replay(ticket, items, key);
        true
    }

    fn replay(&mut self, ticket: u64, items: &mut Vec<T>, key: impl Fn(&T) -> &K) {
        self.applied = ticket;
        self.changes.retain(|(seq, _)| *seq > ticket);
        for (_, change) in &self.changes {
            match change {
                Change::Upsert(item) => {
                    match items.iter_mut().find(|i| key(i) == key(item)) {
                        Some(existing) => *existing = item.clone(),
                        None => items.push(item.clone()),
                    }
                }
                Change::Remove(id) => items.retain(|i| key(i) != id),
            }
        }
        if !self.in_flight() {
            self.changes.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(item: &'a (u32, &'static str)) -> &'a u32 {
        &item.0
    }

    #[test]
    fn test_change_after_fetch_survives_it() {
        let mut journal = FetchJournal::default();
        let mut items = vec![(1, "a")];
        let ticket = journal.issue();
        items.push((2, "b"));
        journal.record(Change::Upsert((2, "b")));
        journal.record(Change::Remove(1));

        assert!(journal.settle(ticket, vec![(1, "a")], &mut items, key));
        assert_eq!(items, vec![(2, "b")]);
        assert!(journal.changes.is_empty());
    }

    #[test]
    fn test_changes_without_a_fetch_in_flight_are_not_kept() {
        let mut journal: FetchJournal<(u32, &str), u32> = FetchJournal::default();
        journal.record(Change::Remove(1));
        assert!(journal.changes.is_empty());
    }

    #[test]
    fn test_older_fetch_is_ignored() {
        let mut journal = FetchJournal::default();
        let mut items = Vec::new();
        let first = journal.issue();
        let second = journal.issue();
        assert!(journal.settle(second, vec![(1, "new")], &mut items, key));
        assert!(!journal.settle(first, vec![(1, "old")], &mut items, key));
        assert!(!journal.fail(first, &mut items, key));
        assert_eq!(items, vec![(1, "new")]);
    }

    #[test]
    fn test_only_changes_newer_than_the_fetch_are_replayed() {
        let mut journal = FetchJournal::default();
        let mut items = Vec::new();
        let first = journal.issue();
        journal.record(Change::Upsert((1, "before second")));
        let second = journal.issue();
        journal.record(Change::Upsert((2, "after second")));

        assert!(journal.settle(first, Vec::new(), &mut items, key));
        assert_eq!(items.len(), 2);
        assert!(journal.settle(second, vec![(1, "before second")], &mut items, key));
        assert_eq!(items, vec![(1, "before second"), (2, "after second")]);
    }
}
