//! Range-scan cursor over the leaf chain.
//!
//! A scan descends once to the leaf where qualifying keys begin, then walks
//! entries left to right, following right-sibling pointers across leaves.
//! While a cursor references a leaf, exactly that one page stays pinned; the
//! sibling jump pins the next leaf before releasing the current one.

use crate::buffer::PageGuard;
use crate::error::{Error, Result};
use crate::storage::page::{PageNo, RecordId, NO_PAGE};

use super::layout::{LeafView, LEAF_CAPACITY};
use super::tree::BTreeIndex;
use super::Operator;

/// State of an active scan. Dropping it releases the pinned leaf.
pub(super) struct ScanState {
    low: i32,
    high: i32,
    low_op: Operator,
    high_op: Operator,
    /// The currently pinned leaf; `None` on a tree with no leaves.
    leaf: Option<PageGuard>,
    next_entry: usize,
}

impl BTreeIndex {
    /// Position a scan on the first entry that can satisfy
    /// `low <low_op> key <high_op> high`. The low operator must be
    /// `Gt`/`Gte` and the high operator `Lt`/`Lte`, and `low <= high`;
    /// violations fail without touching cursor state. A successful call
    /// replaces any scan already in progress.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: Operator,
        high: i32,
        high_op: Operator,
    ) -> Result<()> {
        if !matches!(low_op, Operator::Gt | Operator::Gte)
            || !matches!(high_op, Operator::Lt | Operator::Lte)
        {
            return Err(Error::BadOpcodes);
        }
        if low > high {
            return Err(Error::BadScanrange);
        }
        self.scan = None;
        let leaf_page = self.find_leaf(low)?;
        let leaf = if leaf_page == NO_PAGE {
            None
        } else {
            Some(self.pool.fetch_page(self.file, leaf_page)?)
        };
        self.scan = Some(ScanState {
            low,
            high,
            low_op,
            high_op,
            leaf,
            next_entry: 0,
        });
        Ok(())
    }

    /// The next qualifying record id. `IndexScanCompleted` once the range is
    /// exhausted; the cursor then returns to idle and releases its page.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        loop {
            let state = self.scan.as_mut().ok_or(Error::ScanNotInitialized)?;
            let Some(guard) = state.leaf.as_ref() else {
                self.scan = None;
                return Err(Error::IndexScanCompleted);
            };

            enum Step {
                Jump(PageNo),
                Done,
                Skip,
                Emit(RecordId),
            }
            let step = {
                let data = guard.data();
                let view = LeafView(&data);
                if state.next_entry == LEAF_CAPACITY || !view.is_occupied(state.next_entry) {
                    match view.right_sib() {
                        NO_PAGE => Step::Done,
                        sib => Step::Jump(sib),
                    }
                } else {
                    let key = view.key(state.next_entry);
                    let below = match state.low_op {
                        Operator::Gt => key <= state.low,
                        _ => key < state.low,
                    };
                    if below {
                        Step::Skip
                    } else {
                        let past = match state.high_op {
                            Operator::Lt => key >= state.high,
                            _ => key > state.high,
                        };
                        if past {
                            Step::Done
                        } else {
                            Step::Emit(view.rid(state.next_entry))
                        }
                    }
                }
            };

            match step {
                Step::Jump(sib) => {
                    // Pin the sibling before the current page is released.
                    let next = self.pool.fetch_page(self.file, sib)?;
                    state.leaf = Some(next);
                    state.next_entry = 0;
                }
                Step::Skip => state.next_entry += 1,
                Step::Emit(rid) => {
                    state.next_entry += 1;
                    return Ok(rid);
                }
                Step::Done => {
                    self.scan = None;
                    return Err(Error::IndexScanCompleted);
                }
            }
        }
    }

    /// Terminate an active scan and release its page. Fails
    /// `ScanNotInitialized` when no scan is in progress.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan.take() {
            Some(_) => Ok(()),
            None => Err(Error::ScanNotInitialized),
        }
    }
}
