use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Interval, PersonId, SpotId};

/// Audit entry written on every booking and every check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub lot: String,
    pub spot: SpotId,
    pub interval: Interval,
}

impl HistoryRecord {
    pub fn new(lot: impl Into<String>, spot: SpotId, interval: Interval) -> Self {
        Self {
            lot: lot.into(),
            spot,
            interval,
        }
    }
}

/// Penalty issued to an occupant evicted by a valid reservation holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineRecord {
    pub info: HistoryRecord,
    pub notice: String,
}

impl FineRecord {
    pub fn new(info: HistoryRecord) -> Self {
        let notice = format!("You have a 500kr fine from parking at {}.", info.lot);
        Self { info, notice }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fines {
    #[default]
    Absent,
    Present(Vec<FineRecord>),
}

impl Fines {
    pub fn push(&mut self, fine: FineRecord) {
        match self {
            Fines::Absent => *self = Fines::Present(vec![fine]),
            Fines::Present(list) => list.push(fine),
        }
    }

    pub fn as_slice(&self) -> &[FineRecord] {
        match self {
            Fines::Absent => &[],
            Fines::Present(list) => list,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// History and fines for one person. Grows monotonically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub history: Vec<HistoryRecord>,
    pub fines: Fines,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineLedger {
    entries: HashMap<PersonId, LedgerEntry>,
}

impl FineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_history(&mut self, person: PersonId, record: HistoryRecord) {
        self.entries.entry(person).or_default().history.push(record);
    }

    /// Append a fine. A person without an entry gets one whose history is
    /// seeded from the fined record.
    pub fn issue_fine(&mut self, person: PersonId, fine: FineRecord) {
        let entry = self.entries.entry(person).or_insert_with(|| LedgerEntry {
            history: vec![fine.info.clone()],
            fines: Fines::Absent,
        });
        entry.fines.push(fine);
    }

    pub fn lookup(&self, person: PersonId) -> Option<&LedgerEntry> {
        self.entries.get(&person)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
