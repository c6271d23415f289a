//! Opcodes and instruction shape for the database machine.
//!
//! A closed enum dispatched with a single `match`, the same style used
//! elsewhere in this crate for matching over closed tagged sets
//! (`NodeType`, cell variants) rather than a dynamic handler table.

/// One instruction. Unused operands are left at `0` / `None`; which
/// operands a given opcode reads is documented on the opcode itself.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub p1: i64,
    pub p2: i64,
    pub p3: i64,
    pub p4: Option<P4>,
}

impl Instruction {
    pub fn new(opcode: Opcode, p1: i64, p2: i64, p3: i64) -> Self {
        Instruction {
            opcode,
            p1,
            p2,
            p3,
            p4: None,
        }
    }

    pub fn with_p4(opcode: Opcode, p1: i64, p2: i64, p3: i64, p4: P4) -> Self {
        Instruction {
            opcode,
            p1,
            p2,
            p3,
            p4: Some(p4),
        }
    }
}

/// An out-of-band operand too wide to fit in an `i64` p1/p2/p3 slot.
#[derive(Debug, Clone, PartialEq)]
pub enum P4 {
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// p1 = cursor id, p2 = register holding the root page, p3 = column
    /// count. Opens a read cursor on the B-tree rooted at that page.
    OpenRead,
    /// p1 = cursor id, p2 = register holding the root page, p3 = column
    /// count. Opens a write cursor.
    OpenWrite,
    /// p1 = cursor id. Releases a cursor.
    Close,
    /// p1 = cursor id, p2 = jump target if the table is empty.
    Rewind,
    /// p1 = cursor id, p2 = jump target taken if another row exists.
    Next,
    /// p1 = cursor id, p2 = jump target taken if another row exists
    /// (reserved; this machine's cursors are forward-only, see DESIGN.md).
    Prev,
    /// p1 = cursor id, p2 = jump target on miss, p3 = register holding the
    /// seek key. Positions the cursor exactly on that key (reserved; this
    /// machine's cursor only supports a full-table rewind/advance scan).
    Seek,
    /// As `Seek`, but positions on the first key strictly greater than the
    /// seek key (reserved, see `Seek`).
    SeekGt,
    /// As `Seek`, but positions on the first key greater than or equal to
    /// the seek key (reserved, see `Seek`).
    SeekGe,
    /// p1 = cursor id, p2 = jump target, p3 = register holding the seek
    /// key. Index-tree analogue of `SeekGt` (reserved, see `Seek`).
    IdxGt,
    /// Index-tree analogue of `SeekGe` (reserved, see `Seek`).
    IdxGe,
    /// Index-tree analogue of `SeekGt` walking backward (reserved, see
    /// `Seek`).
    IdxLt,
    /// Index-tree analogue of `SeekGe` walking backward (reserved, see
    /// `Seek`).
    IdxLe,
    /// p1 = cursor id, p2 = destination register. Loads the index entry's
    /// key-of-the-indexed-column (reserved, see `Seek`).
    IdxKey,
    /// p1 = cursor id, p2 = register holding the encoded index entry.
    /// Inserts into an index B-tree (reserved, see `Seek`).
    IdxInsert,
    /// p1 = cursor id, p2 = column index, p3 = destination register.
    Column,
    /// p1 = cursor id, p2 = destination register. Loads the row's key.
    Key,
    /// p1 = literal value, p2 = destination register.
    Integer,
    /// p2 = destination register, p4 = literal text.
    String,
    /// p2 = destination register.
    Null,
    /// p1 = first register, p2 = register count. Emits a result row.
    ResultRow,
    /// p1 = first register, p2 = register count, p3 = destination
    /// register. Packs registers `[p1, p1+p2)` into a record, as a blob.
    MakeRecord,
    /// p1 = cursor id, p2 = register holding the record blob, p3 =
    /// register holding the key.
    Insert,
    /// p1, p3 = registers to compare, p2 = jump target taken if true.
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// p1 = destination register for the new root page number. Allocates a
    /// new table B-tree root.
    CreateTable,
    /// p1 = destination register for the new root page number. Allocates a
    /// new index B-tree root.
    CreateIndex,
    /// p1 = source register, p2 = destination register.
    Copy,
    /// p1 = source register, p2 = destination register (shallow copy;
    /// this machine has no reference-counted register values, so `Copy`
    /// and `SCopy` behave identically).
    SCopy,
    /// Stops the program.
    Halt,
    Noop,
}
