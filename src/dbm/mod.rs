//! The database machine: a register-and-cursor virtual machine that runs a
//! compiled, flat instruction sequence against the B-tree engine. Only the
//! dispatch core and the opcodes needed to run a scan-and-project plan
//! (`OpenRead`/`Rewind`/`Column`/`ResultRow`/`Next`/`Halt`) plus table
//! mutation (`CreateTable`/`MakeRecord`/`Insert`) and comparisons are
//! implemented; building a full query plan from SQL is out of scope.

pub mod cursor;
pub mod opcode;

use std::collections::HashMap;

use crate::btree::Btree;
use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::record::{Record, Value as ColumnValue};
use cursor::Cursor;
use opcode::{Instruction, Opcode, P4};

/// A compiled, flat instruction sequence. Control flow is expressed purely
/// through `p2` jump targets on `Rewind`/`Next`/comparison opcodes; there
/// is no separate basic-block structure.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Program { instructions }
    }
}

/// A register's contents. Distinct from `record::Value`: registers also
/// hold an encoded record blob between `MakeRecord` and `Insert`, which
/// never appears as a stored column value.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    Null,
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl RegisterValue {
    fn as_i64(&self) -> Result<i64> {
        match self {
            RegisterValue::Int(v) => Ok(*v),
            _ => Err(Error::Misuse("register does not hold an integer")),
        }
    }

    fn from_column(value: ColumnValue) -> Self {
        match value {
            ColumnValue::Null => RegisterValue::Null,
            ColumnValue::Int8(v) => RegisterValue::Int(v as i64),
            ColumnValue::Int16(v) => RegisterValue::Int(v as i64),
            ColumnValue::Int32(v) => RegisterValue::Int(v as i64),
            ColumnValue::Text(s) => RegisterValue::Text(s),
        }
    }

    fn to_column(&self) -> Result<ColumnValue> {
        Ok(match self {
            RegisterValue::Null => ColumnValue::Null,
            RegisterValue::Text(s) => ColumnValue::Text(s.clone()),
            RegisterValue::Int(v) => {
                if let Ok(v) = i8::try_from(*v) {
                    ColumnValue::Int8(v)
                } else if let Ok(v) = i16::try_from(*v) {
                    ColumnValue::Int16(v)
                } else {
                    ColumnValue::Int32(
                        i32::try_from(*v).map_err(|_| Error::Misuse("integer too wide for a column"))?,
                    )
                }
            }
            RegisterValue::Blob(_) => {
                return Err(Error::Misuse("a blob register cannot be packed as a column value"))
            }
        })
    }
}

/// Executes a `Program` against a `Btree`, collecting every `ResultRow`
/// emitted along the way.
pub struct Machine<'a> {
    btree: &'a mut Btree,
    registers: Vec<RegisterValue>,
    cursors: HashMap<i64, Cursor>,
    output: Vec<Vec<RegisterValue>>,
}

impl<'a> Machine<'a> {
    pub fn new(btree: &'a mut Btree, n_registers: usize) -> Self {
        Machine {
            btree,
            registers: vec![RegisterValue::Null; n_registers],
            cursors: HashMap::new(),
            output: Vec::new(),
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<Vec<Vec<RegisterValue>>> {
        let mut pc: usize = 0;
        while pc < program.instructions.len() {
            let instr = &program.instructions[pc];
            log::trace!("pc={pc} {:?}", instr.opcode);
            match self.step(instr, pc)? {
                Some(next_pc) => pc = next_pc,
                None => break,
            }
        }
        Ok(std::mem::take(&mut self.output))
    }

    fn register(&self, index: i64) -> Result<&RegisterValue> {
        self.registers
            .get(index as usize)
            .ok_or(Error::Misuse("register index out of range"))
    }

    fn set_register(&mut self, index: i64, value: RegisterValue) -> Result<()> {
        let slot = self
            .registers
            .get_mut(index as usize)
            .ok_or(Error::Misuse("register index out of range"))?;
        *slot = value;
        Ok(())
    }

    fn cursor_mut(&mut self, id: i64) -> Result<&mut Cursor> {
        self.cursors.get_mut(&id).ok_or(Error::Misuse("no cursor open with that id"))
    }

    /// Runs one instruction. Returns `Some(next_pc)` to keep running, or
    /// `None` on `Halt`.
    fn step(&mut self, instr: &Instruction, pc: usize) -> Result<Option<usize>> {
        let fallthrough = Some(pc + 1);
        match instr.opcode {
            Opcode::OpenRead | Opcode::OpenWrite => {
                let write = instr.opcode == Opcode::OpenWrite;
                let root = self.register(instr.p2)?.as_i64()? as u32;
                self.cursors.insert(instr.p1, Cursor::new(root, write));
                Ok(fallthrough)
            }
            Opcode::Close => {
                self.cursors.remove(&instr.p1);
                Ok(fallthrough)
            }
            Opcode::Rewind => {
                let cursor = self
                    .cursors
                    .get_mut(&instr.p1)
                    .ok_or(Error::Misuse("no cursor open with that id"))?;
                let has_rows = cursor.rewind(&mut *self.btree)?;
                Ok(Some(if has_rows { pc + 1 } else { instr.p2 as usize }))
            }
            Opcode::Next => {
                let has_more = self.cursor_mut(instr.p1)?.advance();
                Ok(Some(if has_more { instr.p2 as usize } else { pc + 1 }))
            }
            Opcode::Prev => Err(Error::Misuse("Prev is not implemented by this forward-only cursor")),
            Opcode::Seek | Opcode::SeekGt | Opcode::SeekGe => {
                Err(Error::Misuse("keyed seeks are not implemented by this full-scan cursor"))
            }
            Opcode::IdxGt | Opcode::IdxGe | Opcode::IdxLt | Opcode::IdxLe | Opcode::IdxKey | Opcode::IdxInsert => {
                Err(Error::Misuse("index-tree traversal is not implemented by this cursor"))
            }
            Opcode::Column => {
                let cursor = self.cursor_mut(instr.p1)?;
                let payload = cursor.payload().ok_or(Error::Misuse("cursor is not positioned on a row"))?;
                let record = Record::decode(payload)?;
                let value = record
                    .values
                    .get(instr.p2 as usize)
                    .cloned()
                    .unwrap_or(ColumnValue::Null);
                self.set_register(instr.p3, RegisterValue::from_column(value))?;
                Ok(fallthrough)
            }
            Opcode::Key => {
                let cursor = self.cursor_mut(instr.p1)?;
                let key = cursor.key().ok_or(Error::Misuse("cursor is not positioned on a row"))?;
                self.set_register(instr.p2, RegisterValue::Int(key as i64))?;
                Ok(fallthrough)
            }
            Opcode::Integer => {
                self.set_register(instr.p2, RegisterValue::Int(instr.p1))?;
                Ok(fallthrough)
            }
            Opcode::String => {
                let text = match &instr.p4 {
                    Some(P4::Text(s)) => s.clone(),
                    None => return Err(Error::Misuse("String opcode requires a p4 operand")),
                };
                self.set_register(instr.p2, RegisterValue::Text(text))?;
                Ok(fallthrough)
            }
            Opcode::Null => {
                self.set_register(instr.p2, RegisterValue::Null)?;
                Ok(fallthrough)
            }
            Opcode::ResultRow => {
                let start = instr.p1 as usize;
                let count = instr.p2 as usize;
                let row = self
                    .registers
                    .get(start..start + count)
                    .ok_or(Error::Misuse("ResultRow register range out of bounds"))?
                    .to_vec();
                self.output.push(row);
                Ok(fallthrough)
            }
            Opcode::MakeRecord => {
                let start = instr.p1 as usize;
                let count = instr.p2 as usize;
                let slice = self
                    .registers
                    .get(start..start + count)
                    .ok_or(Error::Misuse("MakeRecord register range out of bounds"))?;
                let values = slice
                    .iter()
                    .map(RegisterValue::to_column)
                    .collect::<Result<Vec<_>>>()?;
                let encoded = Record::new(values).encode()?;
                self.set_register(instr.p3, RegisterValue::Blob(encoded))?;
                Ok(fallthrough)
            }
            Opcode::Insert => {
                let root = self.cursor_mut(instr.p1)?.root();
                let key = self.register(instr.p3)?.as_i64()? as u32;
                let payload = match self.register(instr.p2)? {
                    RegisterValue::Blob(bytes) => bytes.clone(),
                    _ => return Err(Error::Misuse("Insert's record register does not hold a blob")),
                };
                self.btree.insert(root, Cell::TableLeaf { key, payload })?;
                Ok(fallthrough)
            }
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let lhs = self.register(instr.p1)?.clone();
                let rhs = self.register(instr.p3)?.clone();
                let ordering = compare_registers(&lhs, &rhs)?;
                let take_branch = match instr.opcode {
                    Opcode::Eq => ordering == std::cmp::Ordering::Equal,
                    Opcode::Ne => ordering != std::cmp::Ordering::Equal,
                    Opcode::Lt => ordering == std::cmp::Ordering::Less,
                    Opcode::Le => ordering != std::cmp::Ordering::Greater,
                    Opcode::Gt => ordering == std::cmp::Ordering::Greater,
                    Opcode::Ge => ordering != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                Ok(Some(if take_branch { instr.p2 as usize } else { pc + 1 }))
            }
            Opcode::CreateTable => {
                let root = self.btree.new_node(crate::node::NodeType::TableLeaf)?;
                self.set_register(instr.p1, RegisterValue::Int(root as i64))?;
                Ok(fallthrough)
            }
            Opcode::CreateIndex => {
                let root = self.btree.new_node(crate::node::NodeType::IndexLeaf)?;
                self.set_register(instr.p1, RegisterValue::Int(root as i64))?;
                Ok(fallthrough)
            }
            Opcode::Copy | Opcode::SCopy => {
                let value = self.register(instr.p1)?.clone();
                self.set_register(instr.p2, value)?;
                Ok(fallthrough)
            }
            Opcode::Halt => Ok(None),
            Opcode::Noop => Ok(fallthrough),
        }
    }
}

fn compare_registers(lhs: &RegisterValue, rhs: &RegisterValue) -> Result<std::cmp::Ordering> {
    match (lhs, rhs) {
        (RegisterValue::Int(a), RegisterValue::Int(b)) => Ok(a.cmp(b)),
        (RegisterValue::Text(a), RegisterValue::Text(b)) => Ok(a.cmp(b)),
        (RegisterValue::Null, RegisterValue::Null) => Ok(std::cmp::Ordering::Equal),
        _ => Err(Error::Misuse("cannot compare registers of different kinds")),
    }
}
