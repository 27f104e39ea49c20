// Transfer id -> request record map with the in-flight/completed lifecycle.

use std::collections::BTreeMap;
use std::fmt;

use curl::multi::Easy2Handle;

use super::record::RequestRecord;

/// Opaque identity of one submitted transfer. Ids are never reused within an
/// engine instance, so key order is submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferId(u64);

impl TransferId {
    /// Value stored as the driver-side token of the transfer handle.
    pub fn as_token(self) -> usize {
        self.0 as usize
    }

    pub fn from_token(token: usize) -> Self {
        Self(token as u64)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that owns a live request record: the driver's transfer handle in
/// production, a bare record in tests.
pub trait HoldsRecord {
    fn record(&self) -> &RequestRecord;
}

impl HoldsRecord for Easy2Handle<RequestRecord> {
    fn record(&self) -> &RequestRecord {
        self.get_ref()
    }
}

impl HoldsRecord for RequestRecord {
    fn record(&self) -> &RequestRecord {
        self
    }
}

pub enum Entry<H> {
    /// Attached to the transfer driver; the handle owns the record.
    InFlight(H),
    /// Finished and waiting to be drained.
    Completed(RequestRecord),
}

impl<H: HoldsRecord> Entry<H> {
    pub fn record(&self) -> &RequestRecord {
        match self {
            Entry::InFlight(handle) => handle.record(),
            Entry::Completed(record) => record,
        }
    }
}

pub struct RequestRegistry<H> {
    entries: BTreeMap<TransferId, Entry<H>>,
    next_id: u64,
}

impl<H: HoldsRecord> RequestRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Reserve the id for the next submission.
    pub fn allocate_id(&mut self) -> TransferId {
        let id = TransferId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register an in-flight transfer. A duplicate id is a caller bug: it
    /// panics in debug builds and hands the handle back otherwise.
    pub fn insert(&mut self, id: TransferId, handle: H) -> Result<(), H> {
        if self.entries.contains_key(&id) {
            debug_assert!(false, "transfer {} registered twice", id);
            return Err(handle);
        }
        self.entries.insert(id, Entry::InFlight(handle));
        Ok(())
    }

    pub fn lookup(&self, id: TransferId) -> Option<&RequestRecord> {
        self.entries.get(&id).map(Entry::record)
    }

    /// Remove an entry and return its ownership. No-op if absent.
    pub fn remove(&mut self, id: TransferId) -> Option<Entry<H>> {
        self.entries.remove(&id)
    }

    /// Keep a finished record until the caller drains it.
    pub fn park_completed(&mut self, id: TransferId, record: RequestRecord) {
        debug_assert!(record.is_done());
        self.entries.insert(id, Entry::Completed(record));
    }

    /// Remove and return every completed record, in submission order.
    pub fn drain_completed(&mut self) -> Vec<(TransferId, RequestRecord)> {
        let ids: Vec<TransferId> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Completed(r) if r.is_done()))
            .map(|(id, _)| *id)
            .collect();

        let mut drained = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(Entry::Completed(record)) = self.entries.remove(&id) {
                drained.push((id, record));
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, Entry::InFlight(_)))
            .count()
    }

    pub fn completed_count(&self) -> usize {
        self.len() - self.in_flight_count()
    }

    /// Drop every entry. In-flight handles detach from the driver as they go,
    /// so this must run before the driver itself is released.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<H: HoldsRecord> Default for RequestRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
