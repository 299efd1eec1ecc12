// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

const TYPE_SHIFT: u32 = 56;
const CLASS_SHIFT: u32 = 32;
const CLASS_MASK: u64 = 0xffff;
const USER_HI_MASK: u64 = 0xffff_ffff;

/// Object identifier: a 128-bit value split into `hi` and `lo` halves.
///
/// The top byte of `hi` carries the object type and bits 32..48 carry the
/// object class. The low 32 bits of `hi` and all of `lo` belong to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId {
    pub hi: u64,
    pub lo: u64,
}

impl ObjectId {
    pub const NIL: ObjectId = ObjectId { hi: 0, lo: 0 };

    #[must_use]
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    /// Stamps type and class bits over a caller-chosen `(hi, lo)` pair.
    #[must_use]
    pub fn generate(hi: u64, lo: u64, otype: ObjectType, class: ObjectClass) -> Self {
        let hi = (hi & USER_HI_MASK)
            | ((u64::from(class.0) & CLASS_MASK) << CLASS_SHIFT)
            | ((otype as u64) << TYPE_SHIFT);
        Self { hi, lo }
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    #[must_use]
    pub fn otype(&self) -> ObjectType {
        ObjectType::from_bits((self.hi >> TYPE_SHIFT) as u8)
    }

    #[must_use]
    pub fn class(&self) -> ObjectClass {
        ObjectClass(((self.hi >> CLASS_SHIFT) & CLASS_MASK) as u16)
    }

    /// Caller-owned part of `hi`.
    #[must_use]
    pub fn user_hi(&self) -> u64 {
        self.hi & USER_HI_MASK
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.otype() == ObjectType::ArrayByte
    }

    /// Order-preserving key form, used by enumeration anchors.
    #[must_use]
    pub fn to_key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.hi.to_be_bytes());
        key[8..].copy_from_slice(&self.lo.to_be_bytes());
        key
    }

    #[must_use]
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let hi = u64::from_be_bytes(key.get(..8)?.try_into().ok()?);
        let lo = u64::from_be_bytes(key.get(8..16)?.try_into().ok()?);
        Some(Self { hi, lo })
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.hi, self.lo)
    }
}

/// Payload kind stamped into an object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    /// Key-value object with hashed dkeys; directories and the superblock.
    MultiHashed = 0,
    /// Byte array; file data.
    ArrayByte = 1,
    /// Key-value object with integer dkeys.
    MultiUint64 = 2,
}

impl ObjectType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => ObjectType::ArrayByte,
            2 => ObjectType::MultiUint64,
            _ => ObjectType::MultiHashed,
        }
    }
}

/// Redundancy/placement class of an object. `UNKNOWN` defers the choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectClass(pub u16);

impl ObjectClass {
    pub const UNKNOWN: ObjectClass = ObjectClass(0);
    /// Single shard.
    pub const S1: ObjectClass = ObjectClass(1);
    /// Two shards.
    pub const S2: ObjectClass = ObjectClass(2);
    /// Spread over every target.
    pub const SX: ObjectClass = ObjectClass(0xff);

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for ObjectClass {
    fn from(v: u32) -> Self {
        ObjectClass((v & 0xffff) as u16)
    }
}

impl From<ObjectClass> for u32 {
    fn from(c: ObjectClass) -> Self {
        u32::from(c.0)
    }
}

/// Sharding hint used when no explicit class is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassHint {
    Single,
    Max,
}

impl ClassHint {
    #[must_use]
    pub fn class(self) -> ObjectClass {
        match self {
            ClassHint::Single => ObjectClass::S1,
            ClassHint::Max => ObjectClass::SX,
        }
    }
}
