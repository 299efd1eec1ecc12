// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Flat transactional object store
//!
//! Objects hold two-level keyed records (dkey, then akey) or byte arrays
//! split into fixed-size chunks. Mutations can be grouped in transactions
//! that fail with `Error::Restart` on conflict. Snapshots expose an
//! object-ID table for reachability scans.

mod error;
pub mod memory;
mod oid;
mod store;
mod types;

pub use error::{Error, Result};
pub use memory::{MemoryStore, TxStats};
pub use oid::{ClassHint, ObjectClass, ObjectId, ObjectType};
pub use store::ObjectStore;
pub use types::{
    ARRAY_AKEY, AkeyCond, AkeyUpdate, Anchor, ArrayStat, ContainerProps, Epoch, FetchCond, Iod, IodKind,
    LayoutType, OitHandle, OpenMode, PunchCond, Tx, UpdateCond, UpdateValue,
};
