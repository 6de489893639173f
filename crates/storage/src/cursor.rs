//! Batched enumeration cursor over a [`Table`].
//!
//! The cursor never holds the table lock between batches, so concurrent
//! writers make progress while an enumeration is open. Each batch starts
//! strictly after the last key handed out, which also makes the cursor
//! restartable from its resume token.

use crate::table::Table;
use parking_lot::RwLock;
use replstore_core::{Key, Record, RecordCursor, ResumeToken, StoreResult};
use std::collections::VecDeque;

/// Cursor yielding records with a given prefix in key order
pub struct TableCursor<'a> {
    table: &'a RwLock<Table>,
    prefix: Vec<u8>,
    after: Option<Key>,
    buffer: VecDeque<Record>,
    last_yielded: Option<Key>,
    batch_size: usize,
    exhausted: bool,
}

impl<'a> TableCursor<'a> {
    /// Open a cursor, optionally resuming after a token's key
    pub fn new(
        table: &'a RwLock<Table>,
        prefix: &[u8],
        resume: Option<&ResumeToken>,
        batch_size: usize,
    ) -> Self {
        let after = resume.map(|t| t.last_key().clone());
        TableCursor {
            table,
            prefix: prefix.to_vec(),
            last_yielded: after.clone(),
            after,
            buffer: VecDeque::new(),
            batch_size: batch_size.max(1),
            exhausted: false,
        }
    }

    fn fill(&mut self) {
        let batch = self
            .table
            .read()
            .batch_after(&self.prefix, self.after.as_ref(), self.batch_size);
        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            self.after = Some(last.key.clone());
        }
        self.buffer.extend(batch);
    }
}

impl Iterator for TableCursor<'_> {
    type Item = StoreResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill();
        }
        let record = self.buffer.pop_front()?;
        self.last_yielded = Some(record.key.clone());
        Some(Ok(record))
    }
}

impl RecordCursor for TableCursor<'_> {
    fn resume_token(&self) -> Option<ResumeToken> {
        self.last_yielded.clone().map(ResumeToken::after)
    }
}
