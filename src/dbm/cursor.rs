//! Table cursors for the database machine.
//!
//! The B-tree engine has no persistent cursor of its own (its public
//! contract only names `find`/`insert`); a DBM cursor is built on top by
//! taking one full in-order snapshot of the table at `rewind` time and
//! walking it with a plain index. That keeps `Rewind`/`Next` O(1) per step
//! after the initial scan, at the cost of not seeing rows inserted by the
//! same program after the cursor was opened — acceptable for a didactic
//! machine with no concurrent writers (see DESIGN.md).

use crate::btree::Btree;
use crate::error::Result;

pub struct Cursor {
    root: u32,
    rows: Vec<(u32, Vec<u8>)>,
    pos: Option<usize>,
    pub write: bool,
}

impl Cursor {
    pub fn new(root: u32, write: bool) -> Self {
        Cursor {
            root,
            rows: Vec::new(),
            pos: None,
            write,
        }
    }

    /// Loads the full row set and positions at the first row. Returns
    /// `true` if the table has at least one row.
    pub fn rewind(&mut self, btree: &mut Btree) -> Result<bool> {
        self.rows = btree.scan_table(self.root)?;
        self.pos = if self.rows.is_empty() { None } else { Some(0) };
        Ok(self.pos.is_some())
    }

    /// Advances to the next row. Returns `true` if a row is now current.
    pub fn advance(&mut self) -> bool {
        match self.pos {
            Some(i) if i + 1 < self.rows.len() => {
                self.pos = Some(i + 1);
                true
            }
            _ => {
                self.pos = None;
                false
            }
        }
    }

    pub fn key(&self) -> Option<u32> {
        self.pos.map(|i| self.rows[i].0)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.pos.map(|i| self.rows[i].1.as_slice())
    }

    pub fn root(&self) -> u32 {
        self.root
    }
}
