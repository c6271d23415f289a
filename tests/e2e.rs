//! End-to-end scenarios against real temp-directory files: opening a fresh
//! database, header validation, single-key round trips, root-splitting
//! under volume, duplicate rejection, and a full DBM scan-and-project
//! program.

use btreestore::btree::Btree;
use btreestore::cell::Cell;
use btreestore::dbm::opcode::{Instruction, Opcode};
use btreestore::dbm::{Machine, Program, RegisterValue};
use btreestore::error::Error;
use btreestore::node::NodeType;
use btreestore::record::{Record, Value};
use tempfile::NamedTempFile;

fn temp_path() -> String {
    let f = NamedTempFile::new().unwrap();
    let path = f.path().to_str().unwrap().to_string();
    drop(f);
    path
}

/// Opening a nonexistent file produces a default 1024-byte file with
/// the expected header and an empty table-leaf root.
#[test]
fn opening_nonexistent_file_yields_default_layout() {
    let path = temp_path();
    let bt = Btree::open(&path).unwrap();
    assert_eq!(bt.page_size(), 1024);
    bt.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 1024);
    assert_eq!(&bytes[0..16], b"SQLite format 3\0");
    assert_eq!(&bytes[16..18], &[0x04, 0x00]);
    assert_eq!(&bytes[100..107], &[0x0D, 0x00, 0x08, 0x04, 0x00, 0x00, 0x00]);
    std::fs::remove_file(&path).ok();
}

/// A corrupted page-size literal is rejected at open.
#[test]
fn corrupt_page_size_literal_yields_corrupt_header() {
    let path = temp_path();
    {
        let bt = Btree::open(&path).unwrap();
        bt.close().unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0x10] = 0xFF;
    bytes[0x11] = 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let err = Btree::open(&path).unwrap_err();
    assert!(matches!(err, Error::CorruptHeader));
    std::fs::remove_file(&path).ok();
}

/// Rejected page-cache-size literal in the file header.
#[test]
fn rejected_page_cache_size_yields_corrupt_header() {
    let path = temp_path();
    {
        let bt = Btree::open(&path).unwrap();
        bt.close().unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0x30..0x34].copy_from_slice(&20000u32.to_be_bytes());
    std::fs::write(&path, bytes).unwrap();

    let err = Btree::open(&path).unwrap_err();
    assert!(matches!(err, Error::CorruptHeader));
    std::fs::remove_file(&path).ok();
}

/// Inserting one entry into the default root and finding it back
/// reproduces the payload byte-for-byte.
#[test]
fn single_insert_then_find_round_trips_payload() {
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

/// Inserting past the root's capacity triggers a root-split that
/// preserves every prior key and the root's page number.
#[test]
fn volume_insert_triggers_root_split_and_preserves_prior_keys() {
    let path = temp_path();
    let mut bt = Btree::open(&path).unwrap();

    let n = 600u32;
    for key in 1..=n {
        let record = Record::new(vec![Value::Int32(key as i32)]).encode().unwrap();
        bt.insert(1, Cell::TableLeaf { key, payload: record }).unwrap();
    }

    for key in 1..=n {
        let payload = bt.find(1, key).unwrap();
        let decoded = Record::decode(&payload).unwrap();
        assert_eq!(decoded.values[0], Value::Int32(key as i32));
    }

    bt.close().unwrap();

    // Re-open and confirm the root (still page 1) is now internal.
    let mut bt = Btree::open(&path).unwrap();
    let err = bt.find(1, n + 1).unwrap_err();
    assert!(matches!(err, Error::NotFound));
    bt.close().unwrap();
    std::fs::remove_file(&path).ok();
}

/// Duplicate keys in a table B-tree are rejected; the first insert's
/// payload survives unchanged.
#[test]
fn duplicate_key_is_rejected_original_survives() {
    let path = temp_path();
    let mut bt = Btree::open(&path).unwrap();
    bt.insert(1, Cell::TableLeaf { key: 7, payload: vec![1, 2, 3] }).unwrap();
    let err = bt
        .insert(1, Cell::TableLeaf { key: 7, payload: vec![9, 9, 9] })
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate));
    assert_eq!(bt.find(1, 7).unwrap(), vec![1, 2, 3]);
    bt.close().unwrap();
    std::fs::remove_file(&path).ok();
}

/// A scan-and-project DBM program run over a two-row table yields both
/// rows in key order.
#[test]
fn dbm_scan_and_project_program_yields_expected_rows() {
    let path = temp_path();
    let mut bt = Btree::open(&path).unwrap();
    for (key, text) in [(10u32, "a"), (20, "b")] {
        let record = Record::new(vec![Value::Text(text.to_string())]).encode().unwrap();
        bt.insert(1, Cell::TableLeaf { key, payload: record }).unwrap();
    }

    let program = Program::new(vec![
        Instruction::new(Opcode::Integer, 1, 0, 0),
        Instruction::new(Opcode::OpenRead, 0, 0, 1),
        Instruction::new(Opcode::Rewind, 0, 6, 0),
        Instruction::new(Opcode::Column, 0, 0, 1),
        Instruction::new(Opcode::ResultRow, 1, 1, 0),
        Instruction::new(Opcode::Next, 0, 3, 0),
        Instruction::new(Opcode::Halt, 0, 0, 0),
    ]);

    let mut machine = Machine::new(&mut bt, 4);
    let rows = machine.run(&program).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec![RegisterValue::Text("a".into())]);
    assert_eq!(rows[1], vec![RegisterValue::Text("b".into())]);

    bt.close().unwrap();
    std::fs::remove_file(&path).ok();
}

/// A root page number never changes across splits, even for a table
/// created mid-program via `CreateTable`.
#[test]
fn created_table_root_is_stable_and_independently_insertable() {
    let path = temp_path();
    let mut bt = Btree::open(&path).unwrap();
    let root = bt.new_node(NodeType::TableLeaf).unwrap();
    assert_ne!(root, 1);

    for key in 1..=300u32 {
        bt.insert(root, Cell::TableLeaf { key, payload: vec![0u8; 8] }).unwrap();
    }
    for key in 1..=300u32 {
        bt.find(root, key).unwrap();
    }

    // The original page-1 table is untouched by inserts into `root`.
    assert!(matches!(bt.find(1, 1), Err(Error::NotFound)));
    bt.close().unwrap();
    std::fs::remove_file(&path).ok();
}
