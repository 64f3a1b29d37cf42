//! Packed 64-bit graph identifiers.
//!
//! Apache AGE addresses every vertex and edge by a `graphid`: the label id in
//! the top 16 bits and a per-label sequence number in the low 48 bits. Packing
//! both into one value lets edges reference vertices directly, without an id
//! mapping table at read time.

use std::collections::HashMap;
use std::fmt;

use crate::error::{MigrateError, Result};

/// Number of bits reserved for the sequence component.
pub const SEQUENCE_BITS: u32 = 48;

/// Number of bits reserved for the label component.
pub const LABEL_BITS: u32 = 16;

const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// A packed `(label_id, sequence)` identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    /// Raw 64-bit representation.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Signed representation, as stored in a PostgreSQL `int8`/`graphid` column.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Label component.
    pub fn label_id(self) -> u16 {
        decode_label(self)
    }

    /// Sequence component.
    pub fn sequence(self) -> u64 {
        decode_sequence(self)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

impl From<i64> for GraphId {
    fn from(raw: i64) -> Self {
        GraphId(raw as u64)
    }
}

/// Pack a label id and a sequence number into a [`GraphId`].
///
/// Fails with [`MigrateError::OutOfRange`] instead of truncating: a silently
/// truncated component would collapse distinct vertices onto one id.
pub fn encode(label_id: u32, sequence: u64) -> Result<GraphId> {
    if label_id >= 1 << LABEL_BITS {
        return Err(MigrateError::OutOfRange {
            what: "label id",
            value: label_id as u64,
            bits: LABEL_BITS,
        });
    }
    if sequence == 0 || sequence > SEQUENCE_MASK {
        return Err(MigrateError::OutOfRange {
            what: "sequence",
            value: sequence,
            bits: SEQUENCE_BITS,
        });
    }
    Ok(GraphId(((label_id as u64) << SEQUENCE_BITS) | sequence))
}

/// Extract the sequence component.
pub fn decode_sequence(id: GraphId) -> u64 {
    id.0 & SEQUENCE_MASK
}

/// Extract the label component.
pub fn decode_label(id: GraphId) -> u16 {
    (id.0 >> SEQUENCE_BITS) as u16
}

/// Assigns dense sequences to source node ids for one vertex label.
///
/// Sequences start at 1 and follow insertion order. The map is rebuilt on
/// every run and must stay alive until the edge phase has finished.
#[derive(Debug, Clone)]
pub struct VertexIdMap {
    label_id: u32,
    ids: HashMap<String, GraphId>,
    next_sequence: u64,
}

impl VertexIdMap {
    /// Create an empty map for a vertex label.
    pub fn new(label_id: u32) -> Result<Self> {
        // Validate the label up front so `assign` only has the sequence to check.
        encode(label_id, 1)?;
        Ok(Self {
            label_id,
            ids: HashMap::new(),
            next_sequence: 1,
        })
    }

    /// Assign the next sequence to `node_id`.
    ///
    /// A node id seen before keeps its original identifier.
    pub fn assign(&mut self, node_id: &str) -> Result<GraphId> {
        if let Some(id) = self.ids.get(node_id) {
            return Ok(*id);
        }
        let id = encode(self.label_id, self.next_sequence)?;
        self.next_sequence += 1;
        self.ids.insert(node_id.to_string(), id);
        Ok(id)
    }

    /// Resolve a node id assigned earlier.
    pub fn get(&self, node_id: &str) -> Option<GraphId> {
        self.ids.get(node_id).copied()
    }

    /// Label the map assigns ids in.
    pub fn label_id(&self) -> u32 {
        self.label_id
    }

    /// Highest sequence handed out so far (0 when empty).
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
