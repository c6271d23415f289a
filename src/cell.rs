//! Cell encoding/decoding: the four on-disk cell shapes, unified behind a
//! single sum type with a common `key()`. Matches the "tagged variants, not
//! subclassing" for the four node kinds.

use crate::error::{Error, Result};
use crate::node::NodeType;
use crate::varint::{get_varint32, put_varint32, read_be_u32, write_be_u32};

/// Literal bytes that precede `keyIdx`/`keyPk` in both index cell shapes.
pub const INDEX_CELL_LITERAL: [u8; 4] = [0x0B, 0x03, 0x04, 0x04];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    TableInternal { child_page: u32, key: u32 },
    TableLeaf { key: u32, payload: Vec<u8> },
    IndexInternal { child_page: u32, key_idx: u32, key_pk: u32 },
    IndexLeaf { key_idx: u32, key_pk: u32 },
}

impl Cell {
    /// The key used for ordering within a node's cell offset array. For
    /// index cells this is `keyIdx`; `keyPk` only breaks ties for
    /// duplicate detection, not for ordering (see
    /// `Cell::index_dedup_key`).
    pub fn key(&self) -> u32 {
        match self {
            Cell::TableInternal { key, .. } => *key,
            Cell::TableLeaf { key, .. } => *key,
            Cell::IndexInternal { key_idx, .. } => *key_idx,
            Cell::IndexLeaf { key_idx, .. } => *key_idx,
        }
    }

    pub fn child_page(&self) -> Option<u32> {
        match self {
            Cell::TableInternal { child_page, .. } => Some(*child_page),
            Cell::IndexInternal { child_page, .. } => Some(*child_page),
            Cell::TableLeaf { .. } | Cell::IndexLeaf { .. } => None,
        }
    }

    /// The `(keyIdx, keyPk)` uniqueness key for index B-trees (see
    /// DESIGN.md for why this pair, not `keyIdx` alone, is the dedup key).
    pub fn index_dedup_key(&self) -> Option<(u32, u32)> {
        match self {
            Cell::IndexInternal { key_idx, key_pk, .. } => Some((*key_idx, *key_pk)),
            Cell::IndexLeaf { key_idx, key_pk } => Some((*key_idx, *key_pk)),
            _ => None,
        }
    }

    pub fn encoded_size(&self) -> usize {
        match self {
            Cell::TableInternal { .. } => 8,
            Cell::TableLeaf { payload, .. } => 8 + payload.len(),
            Cell::IndexInternal { .. } => 16,
            Cell::IndexLeaf { .. } => 12,
        }
    }

    pub fn node_type_for(table: bool, internal: bool) -> NodeType {
        match (table, internal) {
            (true, true) => NodeType::TableInternal,
            (true, false) => NodeType::TableLeaf,
            (false, true) => NodeType::IndexInternal,
            (false, false) => NodeType::IndexLeaf,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.encoded_size()];
        match self {
            Cell::TableInternal { child_page, key } => {
                write_be_u32(*child_page, &mut out[0..4]);
                put_varint32(*key, (&mut out[4..8]).try_into().unwrap());
            }
            Cell::TableLeaf { key, payload } => {
                put_varint32(payload.len() as u32, (&mut out[0..4]).try_into().unwrap());
                put_varint32(*key, (&mut out[4..8]).try_into().unwrap());
                out[8..].copy_from_slice(payload);
            }
            Cell::IndexInternal {
                child_page,
                key_idx,
                key_pk,
            } => {
                write_be_u32(*child_page, &mut out[0..4]);
                out[4..8].copy_from_slice(&INDEX_CELL_LITERAL);
                write_be_u32(*key_idx, &mut out[8..12]);
                write_be_u32(*key_pk, &mut out[12..16]);
            }
            Cell::IndexLeaf { key_idx, key_pk } => {
                out[0..4].copy_from_slice(&INDEX_CELL_LITERAL);
                write_be_u32(*key_idx, &mut out[4..8]);
                write_be_u32(*key_pk, &mut out[8..12]);
            }
        }
        out
    }

    /// Decodes a cell of the shape implied by `node_type` starting at the
    /// front of `bytes`. `bytes` may extend past the end of the cell (it is
    /// usually the tail of the page buffer from the cell's offset onward).
    pub fn decode(node_type: NodeType, bytes: &[u8]) -> Result<Self> {
        match node_type {
            NodeType::TableInternal => {
                let child_page = read_be_u32(&bytes[0..4]);
                let key = get_varint32(&bytes[4..8]);
                Ok(Cell::TableInternal { child_page, key })
            }
            NodeType::TableLeaf => {
                let data_size = get_varint32(&bytes[0..4]) as usize;
                let key = get_varint32(&bytes[4..8]);
                let payload = bytes
                    .get(8..8 + data_size)
                    .ok_or(Error::Misuse("table-leaf cell payload out of bounds"))?
                    .to_vec();
                Ok(Cell::TableLeaf { key, payload })
            }
            NodeType::IndexInternal => {
                let child_page = read_be_u32(&bytes[0..4]);
                let key_idx = read_be_u32(&bytes[8..12]);
                let key_pk = read_be_u32(&bytes[12..16]);
                Ok(Cell::IndexInternal {
                    child_page,
                    key_idx,
                    key_pk,
                })
            }
            NodeType::IndexLeaf => {
                let key_idx = read_be_u32(&bytes[4..8]);
                let key_pk = read_be_u32(&bytes[8..12]);
                Ok(Cell::IndexLeaf { key_idx, key_pk })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_leaf_round_trips() {
        let cell = Cell::TableLeaf {
            key: 42,
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let encoded = cell.encode();
        assert_eq!(encoded.len(), 12);
        let decoded = Cell::decode(NodeType::TableLeaf, &encoded).unwrap();
        assert_eq!(decoded, cell);
    }

    #[test]
    fn table_internal_round_trips() {
        let cell = Cell::TableInternal {
            child_page: 7,
            key: 900,
        };
        let encoded = cell.encode();
        assert_eq!(encoded.len(), 8);
        assert_eq!(Cell::decode(NodeType::TableInternal, &encoded).unwrap(), cell);
    }

    #[test]
    fn index_cells_round_trip_and_carry_literal() {
        let leaf = Cell::IndexLeaf {
            key_idx: 3,
            key_pk: 5,
        };
        let encoded = leaf.encode();
        assert_eq!(&encoded[0..4], &INDEX_CELL_LITERAL);
        assert_eq!(Cell::decode(NodeType::IndexLeaf, &encoded).unwrap(), leaf);

        let internal = Cell::IndexInternal {
            child_page: 2,
            key_idx: 3,
            key_pk: 5,
        };
        let encoded = internal.encode();
        assert_eq!(&encoded[4..8], &INDEX_CELL_LITERAL);
        assert_eq!(
            Cell::decode(NodeType::IndexInternal, &encoded).unwrap(),
            internal
        );
    }
}
