//! Parsing stored node records into in-memory nodes.
//!
//! Three record shapes are accepted: the classical two-element short node
//! (a leaf, or an extension wrapping a full node), the compact five-element
//! versioned branch written by the finalizer, and the classical 17-element
//! full node with inline children. A bare 32-byte string inside a versioned
//! branch is a reference to a persisted child and becomes a `Stored`
//! placeholder; its leaf-ness and version come from the parent's masks.

use primitive_types::H256;

use super::StoreError;
use crate::data::Nibbles;
use crate::merkle::rlp;
use crate::merkle::{Node, BRANCH_WIDTH, HASH_SIZE};

/// Bit vector over the sixteen child slots of a stored branch record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChildMask(pub u16);

impl ChildMask {
    pub fn set(&mut self, slot: usize) {
        self.0 |= 1 << slot;
    }

    pub fn test(&self, slot: usize) -> bool {
        self.0 & (1 << slot) != 0
    }
}

/// Decodes a node record fetched from the structural namespace.
pub fn decode_record(bytes: &[u8], version: u32) -> Result<Node, StoreError> {
    let (payload, _) = rlp::split_list(bytes)?;
    match rlp::count_items(payload)? {
        2 => decode_short(payload, version),
        5 => decode_versioned_branch(payload, version),
        17 => decode_legacy_branch(Nibbles::new(), payload, version),
        arity => Err(StoreError::BadRecord(format!(
            "unknown node arity {arity}"
        ))),
    }
}

/// Outcome of decoding one embedded item: either a complete node, or a bare
/// hash whose meaning depends on the enclosing record.
enum Decoded {
    Node(Node),
    HashRef(H256),
}

fn decode_item(buf: &[u8], version: u32) -> Result<(Decoded, &[u8]), StoreError> {
    let (kind, payload, rest) = rlp::split(buf)?;
    if kind == rlp::Kind::String {
        if payload.is_empty() {
            return Ok((Decoded::Node(Node::Empty), rest));
        }
        if payload.len() == HASH_SIZE {
            return Ok((Decoded::HashRef(H256::from_slice(payload)), rest));
        }
        return Err(StoreError::BadRecord(format!(
            "string of {} bytes is neither empty nor a hash",
            payload.len()
        )));
    }
    let node = match rlp::count_items(payload)? {
        2 => decode_short(payload, version)?,
        5 => decode_versioned_branch(payload, version)?,
        17 => decode_legacy_branch(Nibbles::new(), payload, version)?,
        arity => {
            return Err(StoreError::BadRecord(format!(
                "unknown node arity {arity}"
            )))
        }
    };
    Ok((Decoded::Node(node), rest))
}

fn decode_short(payload: &[u8], version: u32) -> Result<Node, StoreError> {
    let (compact, rest) = rlp::split_string(payload)?;
    let path = Nibbles::from_compact(compact);
    if path.has_term() {
        let (value, _) = rlp::split_string(rest)?;
        return Ok(Node::leaf(path, value.to_vec(), version));
    }
    // An extension always wraps a full node; fold its prefix in.
    let (inner, _) = rlp::split_list(rest)?;
    if rlp::count_items(inner)? != 17 {
        return Err(StoreError::BadRecord(
            "extension must wrap a 17-element node".into(),
        ));
    }
    decode_legacy_branch(path, inner, version)
}

fn decode_legacy_branch(
    prefix: Nibbles,
    payload: &[u8],
    version: u32,
) -> Result<Node, StoreError> {
    let mut children: [Node; BRANCH_WIDTH] = Default::default();
    let mut rest = payload;
    for slot in children.iter_mut() {
        let (decoded, remaining) = decode_item(rest, version)?;
        rest = remaining;
        *slot = match decoded {
            Decoded::Node(node) => node,
            Decoded::HashRef(_) => {
                return Err(StoreError::BadRecord(
                    "legacy branch children must be inline".into(),
                ))
            }
        };
    }
    // The 17th slot is the value position, always empty for fixed-width keys.
    Ok(Node::branch(prefix, children, version))
}

fn decode_versioned_branch(payload: &[u8], version: u32) -> Result<Node, StoreError> {
    let (compact, rest) = rlp::split_string(payload)?;
    let prefix = Nibbles::from_compact(compact);
    let (living, rest) = decode_mask(rest)?;
    let (leaves, rest) = decode_mask(rest)?;
    let (versions, rest) = decode_versions(rest)?;
    let children = decode_children(rest, living, leaves, &versions)?;
    Ok(Node::branch(prefix, children, version))
}

fn decode_mask(buf: &[u8]) -> Result<(ChildMask, &[u8]), StoreError> {
    let (payload, rest) = rlp::split_string(buf)?;
    let mask = rlp::decode_uint(payload)?;
    if mask > u16::MAX as u64 {
        return Err(StoreError::BadRecord(format!("child mask {mask:#x} too wide")));
    }
    Ok((ChildMask(mask as u16), rest))
}

fn decode_versions(buf: &[u8]) -> Result<(Vec<u32>, &[u8]), StoreError> {
    let (mut payload, rest) = rlp::split_list(buf)?;
    let mut versions = Vec::new();
    while !payload.is_empty() {
        let (item, remaining) = rlp::split_string(payload)?;
        payload = remaining;
        versions.push(rlp::decode_uint(item)? as u32);
    }
    Ok((versions, rest))
}

fn decode_children(
    buf: &[u8],
    living: ChildMask,
    leaves: ChildMask,
    versions: &[u32],
) -> Result<[Node; BRANCH_WIDTH], StoreError> {
    let (mut payload, _) = rlp::split_list(buf)?;
    let mut children: [Node; BRANCH_WIDTH] = Default::default();
    let mut next_version = versions.iter();
    for (slot, child) in children.iter_mut().enumerate() {
        if !living.test(slot) {
            continue;
        }
        let version = *next_version.next().ok_or_else(|| {
            StoreError::BadRecord("fewer versions than living children".into())
        })?;
        let (decoded, rest) = decode_item(payload, version)?;
        payload = rest;
        *child = match decoded {
            Decoded::Node(node) => node,
            Decoded::HashRef(hash) => Node::stored(hash, leaves.test(slot), version),
        };
    }
    Ok(children)
}
