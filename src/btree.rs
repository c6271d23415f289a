//! The B-tree engine: interprets pages as typed nodes, traverses and
//! mutates them, and calls the Pager for all I/O. Table B-trees and index
//! B-trees share every operation here except `find`, which only ever
//! searches table B-trees.

use log::debug;

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::node::{Node, NodeType};
use crate::pager::{MemPage, Pager, DEFAULT_PAGE_SIZE, FILE_HEADER_SIZE, VALID_PAGE_SIZES};
use crate::varint::{read_be_u16, write_be_u16};

const HEADER_MAGIC: &[u8; 16] = b"SQLite format 3\0";
const HEADER_LITERAL_0X12: [u8; 6] = [0x01, 0x01, 0x00, 0x40, 0x20, 0x20];
const HEADER_LITERAL_0X20: [u8; 4] = [0, 0, 0, 0];
const HEADER_LITERAL_0X24: [u8; 4] = [0, 0, 0, 0];
const HEADER_LITERAL_0X2C: [u8; 4] = [0, 0, 0, 1];
const HEADER_LITERAL_0X34: [u8; 4] = [0, 0, 0, 0];
const HEADER_LITERAL_0X38: [u8; 4] = [0, 0, 0, 1];
const HEADER_LITERAL_0X40: [u8; 4] = [0, 0, 0, 0];
const REJECTED_PAGE_CACHE_SIZE: u32 = 20000;

/// The internal-cell size that a promotion into a parent will need, for
/// the given node family. Room checks throughout `insert` use the larger
/// of this and the caller's own cell size, so that a split's promoted-cell
/// insertion into a parent can never fail for lack of room: index-internal
/// cells (16 bytes) are larger than the index-leaf cells (12 bytes) that
/// originally sized the room check. See DESIGN.md.
fn promoted_cell_worst_case_size(table: bool) -> usize {
    if table {
        8
    } else {
        16
    }
}

pub struct Btree {
    pager: Pager,
}

impl Btree {
    /// Opens (or creates) a B-tree-backed file. An empty file gets a
    /// default page size and an empty table-leaf root at page 1; an
    /// existing file has its header validated and its page size adopted.
    pub fn open(path: &str) -> Result<Self> {
        let mut pager = Pager::open(path)?;
        if pager.page_count() == 0 {
            pager.set_page_size(DEFAULT_PAGE_SIZE)?;
            let mut header = [0u8; FILE_HEADER_SIZE];
            write_default_header(&mut header, DEFAULT_PAGE_SIZE as u16);
            pager.write_header(&header)?;
            let page = pager.allocate_page()?;
            let node = Node::new_empty(page, NodeType::TableLeaf);
            write_node_to(&mut pager, node)?;
            debug!("initialized new database at {path}");
        } else {
            let header = pager.read_header()?;
            validate_header(&header)?;
            let page_size = read_be_u16(&header[0x10..]) as u32;
            pager.set_page_size(page_size)?;
        }
        Ok(Btree { pager })
    }

    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    pub fn page_size(&self) -> u32 {
        self.pager.page_size()
    }

    // ---- node lifecycle -------------------------------------------------

    /// Allocates a page and initializes an empty node header of `node_type`
    /// over it.
    pub fn new_node(&mut self, node_type: NodeType) -> Result<u32> {
        let page = self.pager.allocate_page()?;
        let npage = page.page_number;
        let node = Node::new_empty(page, node_type);
        write_node_to(&mut self.pager, node)?;
        Ok(npage)
    }

    fn get_node_by_page(&mut self, npage: u32) -> Result<Node> {
        let page = self.pager.read_page(npage)?;
        Node::parse(page)
    }

    fn write_node(&mut self, node: Node) -> Result<()> {
        write_node_to(&mut self.pager, node)
    }

    fn free_mem_node(&mut self, node: Node) -> Result<()> {
        self.pager.release_mem_page(node.into_page())
    }

    fn get_cell(node: &Node, ncell: i64) -> Result<Cell> {
        let bytes = node.raw_cell_start(ncell)?;
        Cell::decode(node.node_type, bytes)
    }

    fn insert_cell_into(node: &mut Node, ncell: usize, cell: &Cell) {
        node.insert_cell_bytes(ncell, &cell.encode());
    }

    /// Collects every `(key, payload)` pair in the table B-tree rooted at
    /// `root`, in ascending key order. Used to seed a DBM cursor's
    /// snapshot (see `dbm::cursor`); not part of the single-key `find`
    /// path, which never needs a full traversal.
    pub fn scan_table(&mut self, root: u32) -> Result<Vec<(u32, Vec<u8>)>> {
        let mut out = Vec::new();
        self.scan_table_into(root, &mut out)?;
        Ok(out)
    }

    fn scan_table_into(&mut self, npage: u32, out: &mut Vec<(u32, Vec<u8>)>) -> Result<()> {
        let node = self.get_node_by_page(npage)?;
        if !node.node_type.is_table() {
            self.free_mem_node(node)?;
            return Err(Error::Misuse("scan_table only walks table B-trees"));
        }
        let is_leaf = node.node_type == NodeType::TableLeaf;
        let n_cells = node.n_cells as i64;
        let mut children = Vec::new();
        for i in 0..n_cells {
            let cell = Self::get_cell(&node, i)?;
            if is_leaf {
                if let Cell::TableLeaf { key, payload } = cell {
                    out.push((key, payload));
                }
            } else {
                children.push(cell.child_page().expect("internal cell has child"));
            }
        }
        let right_page = node.right_page;
        self.free_mem_node(node)?;
        if !is_leaf {
            for child in children {
                self.scan_table_into(child, out)?;
            }
            self.scan_table_into(right_page, out)?;
        }
        Ok(())
    }

    // ---- lookup -----------------------------------------------------------

    /// Looks up `key` in the table B-tree rooted at `root`. Index B-trees
    /// are not searched through this entry point.
    pub fn find(&mut self, root: u32, key: u32) -> Result<Vec<u8>> {
        let mut npage = root;
        loop {
            let node = self.get_node_by_page(npage)?;
            if !node.node_type.is_table() {
                self.free_mem_node(node)?;
                return Err(Error::Misuse("find only searches table B-trees"));
            }
            let is_leaf = node.node_type == NodeType::TableLeaf;
            let n_cells = node.n_cells as i64;

            enum Step {
                Found(Vec<u8>),
                NotFound,
                Descend(u32),
            }

            let mut step = None;
            for i in 0..n_cells {
                let cell = Self::get_cell(&node, i)?;
                let cell_key = cell.key();
                if is_leaf && cell_key == key {
                    if let Cell::TableLeaf { payload, .. } = cell {
                        step = Some(Step::Found(payload));
                    }
                    break;
                } else if key <= cell_key {
                    step = Some(if is_leaf {
                        Step::NotFound
                    } else {
                        Step::Descend(cell.child_page().expect("internal cell has child"))
                    });
                    break;
                }
            }
            let step = step.unwrap_or(if is_leaf {
                Step::NotFound
            } else {
                Step::Descend(node.right_page)
            });
            self.free_mem_node(node)?;
            match step {
                Step::Found(payload) => return Ok(payload),
                Step::NotFound => return Err(Error::NotFound),
                Step::Descend(next) => npage = next,
            }
        }
    }

    // ---- insertion ----------------------------------------------------

    /// Inserts `cell` into the tree rooted at `root`, preserving the root's
    /// page number across any splits.
    pub fn insert(&mut self, root: u32, cell: Cell) -> Result<()> {
        let is_table = cell_is_table(&cell);
        let required = cell
            .encoded_size()
            .max(promoted_cell_worst_case_size(is_table));

        let root_node = self.get_node_by_page(root)?;
        if root_node.has_room_for(required) {
            self.free_mem_node(root_node)?;
            return self.insert_non_full(root, cell);
        }

        debug!("root page {root} full, performing root-split");
        let root_type = root_node.node_type;
        let root_right_page = root_node.right_page;
        let n_cells = root_node.n_cells as i64;

        let new_child_page = self.new_node(root_type)?;
        {
            let mut child_node = self.get_node_by_page(new_child_page)?;
            for i in 0..n_cells {
                let c = Self::get_cell(&root_node, i)?;
                let pos = child_node.n_cells as usize;
                Self::insert_cell_into(&mut child_node, pos, &c);
            }
            if root_type.is_internal() {
                child_node.right_page = root_right_page;
            }
            self.write_node(child_node)?;
        }
        self.free_mem_node(root_node)?;

        let fresh_root = MemPage {
            page_number: root,
            buf: vec![0u8; self.pager.page_size() as usize],
        };
        let mut new_root = Node::new_empty(fresh_root, root_type.internal_sibling());
        new_root.right_page = new_child_page;
        self.write_node(new_root)?;

        self.split(root, new_child_page, 0)?;

        self.insert_non_full(root, cell)
    }

    /// Precondition: `npage` already has room for `cell` (the caller has
    /// verified this, either in `insert` for the root or just below for a
    /// child about to be descended into).
    fn insert_non_full(&mut self, npage: u32, cell: Cell) -> Result<()> {
        let mut node = self.get_node_by_page(npage)?;

        if !node.node_type.is_internal() {
            let (pos, duplicate) = self.leaf_insert_position(&node, &cell)?;
            if duplicate {
                self.free_mem_node(node)?;
                return Err(Error::Duplicate);
            }
            Self::insert_cell_into(&mut node, pos, &cell);
            self.write_node(node)?;
            return Ok(());
        }

        let target_key = cell.key();
        let n_cells = node.n_cells as i64;
        let mut chosen_ncell = n_cells as usize;
        let mut child_page = node.right_page;
        for i in 0..n_cells {
            let c = Self::get_cell(&node, i)?;
            if target_key <= c.key() {
                chosen_ncell = i as usize;
                child_page = c.child_page().expect("internal cell has child");
                break;
            }
        }
        self.free_mem_node(node)?;

        let is_table = cell_is_table(&cell);
        let required = cell
            .encoded_size()
            .max(promoted_cell_worst_case_size(is_table));

        let child_node = self.get_node_by_page(child_page)?;
        if !child_node.has_room_for(required) {
            self.free_mem_node(child_node)?;
            let (new_lower_page, median_key) = self.split(npage, child_page, chosen_ncell)?;
            let descend_into = if target_key <= median_key {
                new_lower_page
            } else {
                child_page
            };
            self.insert_non_full(descend_into, cell)
        } else {
            self.free_mem_node(child_node)?;
            self.insert_non_full(child_page, cell)
        }
    }

    /// Returns `(position, is_duplicate)` for inserting `cell` into the
    /// leaf `node`. Table B-trees reject on `key` alone; index B-trees
    /// reject on `(keyIdx, keyPk)` (see DESIGN.md for why the pair, not
    /// `keyIdx` alone, is the duplicate key; ties in `keyIdx` are broken by
    /// `keyPk`).
    fn leaf_insert_position(&mut self, node: &Node, cell: &Cell) -> Result<(usize, bool)> {
        let target = order_key(cell);
        let n_cells = node.n_cells as i64;
        for i in 0..n_cells {
            let existing = Self::get_cell(node, i)?;
            let existing_key = order_key(&existing);
            if existing_key >= target {
                let duplicate = existing_key == target;
                return Ok((i as usize, duplicate));
            }
        }
        Ok((n_cells as usize, false))
    }

    /// Splits `child_page` (a child of `parent_page`, currently occupying
    /// position `parent_ncell` in the parent's descent order). Returns
    /// the new node's page number and the key
    /// promoted into the parent, so the caller can decide which side of
    /// the split receives the cell it's in the middle of inserting.
    fn split(&mut self, parent_page: u32, child_page: u32, parent_ncell: usize) -> Result<(u32, u32)> {
        let child = self.get_node_by_page(child_page)?;
        let child_type = child.node_type;
        let n_cells = child.n_cells as usize;
        let m = n_cells / 2;

        let mut cells = Vec::with_capacity(n_cells);
        for i in 0..n_cells as i64 {
            cells.push(Self::get_cell(&child, i)?);
        }
        let child_right_page = child.right_page;
        self.free_mem_node(child)?;

        let is_table_leaf = child_type == NodeType::TableLeaf;
        // Table-leaf: median is *copied* to the new node (payload must stay
        // reachable from a leaf); the three other variants *promote* the
        // median, which is not duplicated into either sibling.
        let lower_end = if is_table_leaf { m + 1 } else { m };
        let upper_start = if is_table_leaf { m + 1 } else { m + 1 };

        let median_cell = &cells[m];
        let promoted_key = median_cell.key();

        let new_page_num = self.new_node(child_type)?;
        let mut new_node = self.get_node_by_page(new_page_num)?;
        for cell in &cells[0..lower_end] {
            let pos = new_node.n_cells as usize;
            Self::insert_cell_into(&mut new_node, pos, cell);
        }
        new_node.right_page = if child_type.is_internal() {
            median_cell
                .child_page()
                .expect("internal cell carries a child pointer")
        } else {
            0
        };
        self.write_node(new_node)?;

        let fresh_child = MemPage {
            page_number: child_page,
            buf: vec![0u8; self.pager.page_size() as usize],
        };
        let mut compacted_child = Node::new_empty(fresh_child, child_type);
        compacted_child.right_page = child_right_page;
        for cell in &cells[upper_start..n_cells] {
            let pos = compacted_child.n_cells as usize;
            Self::insert_cell_into(&mut compacted_child, pos, cell);
        }
        self.write_node(compacted_child)?;

        let promoted_cell = match child_type {
            NodeType::TableLeaf | NodeType::TableInternal => Cell::TableInternal {
                child_page: new_page_num,
                key: promoted_key,
            },
            NodeType::IndexLeaf | NodeType::IndexInternal => {
                let (key_idx, key_pk) = median_cell
                    .index_dedup_key()
                    .expect("index cell carries keyIdx/keyPk");
                Cell::IndexInternal {
                    child_page: new_page_num,
                    key_idx,
                    key_pk,
                }
            }
        };

        let mut parent = self.get_node_by_page(parent_page)?;
        debug_assert!(
            parent.has_room_for(promoted_cell.encoded_size()),
            "parent room for a promoted cell is guaranteed by insert's worst-case room checks"
        );
        Self::insert_cell_into(&mut parent, parent_ncell, &promoted_cell);
        self.write_node(parent)?;

        debug!("split page {child_page} -> new page {new_page_num}, promoted key {promoted_key}");
        Ok((new_page_num, promoted_key))
    }
}

fn cell_is_table(cell: &Cell) -> bool {
    matches!(cell, Cell::TableInternal { .. } | Cell::TableLeaf { .. })
}

/// Ordering/dedup key: `(keyIdx, keyPk)` for index cells (so entries
/// sharing a `keyIdx` but differing in `keyPk` sort deterministically and
/// are not mistaken for duplicates), `(key, 0)` for table cells.
fn order_key(cell: &Cell) -> (u32, u32) {
    match cell.index_dedup_key() {
        Some(pair) => pair,
        None => (cell.key(), 0),
    }
}

fn write_node_to(pager: &mut Pager, mut node: Node) -> Result<()> {
    node.write_header();
    pager.write_page(&node.page)
}

fn write_default_header(header: &mut [u8; FILE_HEADER_SIZE], page_size: u16) {
    header[0..16].copy_from_slice(HEADER_MAGIC);
    write_be_u16(page_size, &mut header[0x10..]);
    header[0x12..0x18].copy_from_slice(&HEADER_LITERAL_0X12);
    // file change counter, schema version, user cookie, etc. start at 0.
    header[0x20..0x24].copy_from_slice(&HEADER_LITERAL_0X20);
    header[0x24..0x28].copy_from_slice(&HEADER_LITERAL_0X24);
    header[0x2C..0x30].copy_from_slice(&HEADER_LITERAL_0X2C);
    header[0x34..0x38].copy_from_slice(&HEADER_LITERAL_0X34);
    header[0x38..0x3C].copy_from_slice(&HEADER_LITERAL_0X38);
    header[0x40..0x44].copy_from_slice(&HEADER_LITERAL_0X40);
}

fn validate_header(header: &[u8; FILE_HEADER_SIZE]) -> Result<()> {
    if &header[0..16] != HEADER_MAGIC {
        return Err(Error::CorruptHeader);
    }
    if header[0x12..0x18] != HEADER_LITERAL_0X12 {
        return Err(Error::CorruptHeader);
    }
    if header[0x20..0x24] != HEADER_LITERAL_0X20 {
        return Err(Error::CorruptHeader);
    }
    if header[0x24..0x28] != HEADER_LITERAL_0X24 {
        return Err(Error::CorruptHeader);
    }
    if header[0x2C..0x30] != HEADER_LITERAL_0X2C {
        return Err(Error::CorruptHeader);
    }
    if header[0x34..0x38] != HEADER_LITERAL_0X34 {
        return Err(Error::CorruptHeader);
    }
    if header[0x38..0x3C] != HEADER_LITERAL_0X38 {
        return Err(Error::CorruptHeader);
    }
    if header[0x40..0x44] != HEADER_LITERAL_0X40 {
        return Err(Error::CorruptHeader);
    }
    let page_size = read_be_u16(&header[0x10..]) as u32;
    if !VALID_PAGE_SIZES.contains(&page_size) {
        return Err(Error::CorruptHeader);
    }
    let page_cache_size = crate::varint::read_be_u32(&header[0x30..]);
    if page_cache_size == REJECTED_PAGE_CACHE_SIZE {
        return Err(Error::CorruptHeader);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, Value};
    use tempfile::NamedTempFile;

    fn temp_path() -> String {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_str().unwrap().to_string();
        drop(f);
        path
    }

    #[test]
    fn opening_empty_file_produces_default_leaf_root() {
        let path = temp_path();
        let bt = Btree::open(&path).unwrap();
        assert_eq!(bt.page_size(), DEFAULT_PAGE_SIZE);
        bt.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), DEFAULT_PAGE_SIZE as usize);
        assert_eq!(&bytes[0..16], HEADER_MAGIC);
        assert_eq!(&bytes[16..18], &[0x04, 0x00]);
        assert_eq!(
            &bytes[100..107],
            &[0x0D, 0x00, 0x08, 0x04, 0x00, 0x00, 0x00]
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn corrupt_header_literal_is_rejected() {
        let path = temp_path();
        {
            let bt = Btree::open(&path).unwrap();
            bt.close().unwrap();
        }
        {
            let mut bytes = std::fs::read(&path).unwrap();
            bytes[0x10] = 0xFF;
            bytes[0x11] = 0xFF;
            std::fs::write(&path, bytes).unwrap();
        }
        let err = Btree::open(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptHeader));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn insert_then_find_round_trips() {
        let path = temp_path();
        let mut bt = Btree::open(&path).unwrap();
        bt.insert(
            1,
            Cell::TableLeaf {
                key: 42,
                payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
            },
        )
        .unwrap();
        let payload = bt.find(1, 42).unwrap();
        assert_eq!(payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        bt.close().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn duplicate_table_key_is_rejected_and_original_survives() {
        let path = temp_path();
        let mut bt = Btree::open(&path).unwrap();
        bt.insert(
            1,
            Cell::TableLeaf {
                key: 1,
                payload: vec![1, 2, 3],
            },
        )
        .unwrap();
        let err = bt
            .insert(
                1,
                Cell::TableLeaf {
                    key: 1,
                    payload: vec![9, 9, 9],
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate));
        assert_eq!(bt.find(1, 1).unwrap(), vec![1, 2, 3]);
        bt.close().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn find_on_missing_key_returns_not_found() {
        let path = temp_path();
        let mut bt = Btree::open(&path).unwrap();
        bt.insert(
            1,
            Cell::TableLeaf {
                key: 5,
                payload: vec![1],
            },
        )
        .unwrap();
        assert!(matches!(bt.find(1, 999), Err(Error::NotFound)));
        bt.close().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn many_inserts_trigger_root_split_and_keep_prior_keys_findable() {
        let path = temp_path();
        let mut bt = Btree::open(&path).unwrap();
        let n = 400;
        for key in 1..=n {
            let record = Record::new(vec![Value::Int32(key as i32)]).encode().unwrap();
            bt.insert(
                1,
                Cell::TableLeaf {
                    key,
                    payload: record,
                },
            )
            .unwrap();
        }
        for key in 1..=n {
            let payload = bt.find(1, key).unwrap();
            let decoded = Record::decode(&payload).unwrap();
            assert_eq!(decoded.values[0], Value::Int32(key as i32));
        }

        let root = bt.get_node_by_page(1).unwrap();
        assert_eq!(root.node_type, NodeType::TableInternal);
        assert!(root.n_cells >= 1);
        assert_ne!(root.right_page, 0);
        bt.free_mem_node(root).unwrap();
        bt.close().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn root_page_number_is_stable_across_splits() {
        let path = temp_path();
        let mut bt = Btree::open(&path).unwrap();
        for key in 1..=500u32 {
            bt.insert(
                1,
                Cell::TableLeaf {
                    key,
                    payload: vec![0u8; 16],
                },
            )
            .unwrap();
        }
        // Root page number is always 1 by construction (root-split rewrites
        // page 1 in place); this asserts it still parses as a valid node.
        let root = bt.get_node_by_page(1).unwrap();
        assert_eq!(root.page.page_number, 1);
        bt.free_mem_node(root).unwrap();
        bt.close().unwrap();
        std::fs::remove_file(&path).ok();
    }
}
