//! Sequential enumeration over every file the storage knows about.

use crate::storage::CascStorage;
use crate::types::FileRecord;

/// Enumeration cursor over a storage's files.
///
/// Yields every root manifest record first, then orphan index entries
/// (spans present in the `.idx` files that no manifest record claims)
/// as key-named records. The cursor is a three-state machine: it starts
/// out `NotStarted`, materializes the record list on the first
/// [`advance`](Self::advance), and becomes `Exhausted` once drained.
/// Advancing an exhausted cursor is a no-op returning `None`;
/// [`reset`](Self::reset) rearms it.
pub struct FileCursor<'s> {
    storage: &'s CascStorage,
    state: CursorState,
}

enum CursorState {
    NotStarted,
    Active { records: Vec<FileRecord>, next: usize },
    Exhausted,
}

impl<'s> FileCursor<'s> {
    pub(crate) fn new(storage: &'s CascStorage) -> Self {
        Self {
            storage,
            state: CursorState::NotStarted,
        }
    }

    /// Yield the next record, or `None` when the listing is exhausted.
    pub fn advance(&mut self) -> Option<FileRecord> {
        loop {
            match &mut self.state {
                CursorState::NotStarted => {
                    self.state = CursorState::Active {
                        records: self.storage.enumerate_records(),
                        next: 0,
                    };
                }
                CursorState::Active { records, next } => {
                    if *next >= records.len() {
                        self.state = CursorState::Exhausted;
                        return None;
                    }
                    let record = records[*next].clone();
                    *next += 1;
                    return Some(record);
                }
                CursorState::Exhausted => return None,
            }
        }
    }

    /// Rearm the cursor so the next [`advance`](Self::advance) restarts
    /// from the first record.
    pub fn reset(&mut self) {
        self.state = CursorState::NotStarted;
    }

    /// Whether the cursor has been drained.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }
}

impl Iterator for FileCursor<'_> {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        self.advance()
    }
}
