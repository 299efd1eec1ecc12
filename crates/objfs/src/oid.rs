// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Per-mount object identifier allocation
//!
//! A mount reserves one `lo` value from the container and pairs it with a
//! local 32-bit counter in `hi`, so identifiers are unique without a
//! backend round trip per create.

use crate::error::Result;
use crate::superblock::{RESERVED_LO, ROOT_HI};
use diagnostics::*;
use objstore::{ObjectClass, ObjectId, ObjectStore, ObjectType};
use tokio::sync::Mutex;

/// Exclusive upper bound of the local counter.
pub(crate) const MAX_OID_HI: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OidCounter {
    pub(crate) batch_lo: u64,
    pub(crate) next_hi: u64,
}

#[derive(Debug)]
pub(crate) struct OidAllocator {
    counter: Mutex<OidCounter>,
}

impl OidAllocator {
    /// Reserves the first batch for a read-write mount.
    pub(crate) async fn reserve(store: &dyn ObjectStore) -> Result<Self> {
        let batch_lo = store.alloc_oids(1).await?;
        // The container's first batch shares `lo` with the superblock and root.
        let next_hi = if batch_lo == RESERVED_LO {
            ROOT_HI + 1
        } else {
            0
        };
        debug!("Reserved identifier batch {batch_lo}", batch_lo: batch_lo);
        Ok(Self {
            counter: Mutex::new(OidCounter { batch_lo, next_hi }),
        })
    }

    /// An allocator that reserves a batch on first use.
    pub(crate) fn exhausted() -> Self {
        Self {
            counter: Mutex::new(OidCounter {
                batch_lo: 0,
                next_hi: MAX_OID_HI,
            }),
        }
    }

    pub(crate) async fn snapshot(&self) -> OidCounter {
        *self.counter.lock().await
    }

    /// Next identifier, stamped with type and class by the store.
    pub(crate) async fn next_oid(
        &self,
        store: &dyn ObjectStore,
        for_file: bool,
        class: ObjectClass,
    ) -> Result<ObjectId> {
        let (hi, lo) = {
            let mut counter = self.counter.lock().await;
            if counter.next_hi >= MAX_OID_HI {
                counter.batch_lo = store.alloc_oids(1).await?;
                counter.next_hi = 0;
                let batch_lo = counter.batch_lo;
                debug!("Reserved identifier batch {batch_lo}", batch_lo: batch_lo);
            }
            let hi = counter.next_hi;
            counter.next_hi += 1;
            (hi, counter.batch_lo)
        };
        let otype = if for_file {
            ObjectType::ArrayByte
        } else {
            ObjectType::MultiHashed
        };
        Ok(store.generate_oid(ObjectId::new(hi, lo), otype, class))
    }
}

/// Class for a new object: explicit choice, then the parent's, then the
/// container default.
pub(crate) fn select_class(
    explicit: ObjectClass,
    parent: ObjectClass,
    default: ObjectClass,
) -> ObjectClass {
    [explicit, parent]
        .into_iter()
        .find(|c| !c.is_unknown())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objstore::MemoryStore;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_first_batch_skips_reserved() {
        let store = MemoryStore::new();
        let alloc = OidAllocator::reserve(&store).await.expect("reserve");
        let oid = alloc
            .next_oid(&store, false, ObjectClass::S1)
            .await
            .expect("oid");
        assert_eq!(oid.lo, 0);
        assert_eq!(oid.user_hi(), 2);
        assert_eq!(oid.otype(), ObjectType::MultiHashed);

        let file = alloc
            .next_oid(&store, true, ObjectClass::S2)
            .await
            .expect("oid");
        assert_eq!(file.user_hi(), 3);
        assert!(file.is_array());
        assert_eq!(file.class(), ObjectClass::S2);
    }

    #[tokio::test]
    async fn test_exhausted_reserves_new_batch() {
        let store = MemoryStore::new();
        let _first = OidAllocator::reserve(&store).await.expect("reserve");
        let alloc = OidAllocator::exhausted();
        let oid = alloc
            .next_oid(&store, false, ObjectClass::S1)
            .await
            .expect("oid");
        assert_eq!(oid.lo, 1);
        assert_eq!(oid.user_hi(), 0);
        assert_eq!(
            alloc.snapshot().await,
            OidCounter {
                batch_lo: 1,
                next_hi: 1
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_unique() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let alloc = std::sync::Arc::new(OidAllocator::reserve(store.as_ref()).await.expect("reserve"));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let alloc = alloc.clone();
            tasks.push(tokio::spawn(async move {
                let mut out = Vec::new();
                for _ in 0..50 {
                    out.push(
                        alloc
                            .next_oid(store.as_ref(), false, ObjectClass::S1)
                            .await
                            .expect("oid"),
                    );
                }
                out
            }));
        }
        let mut seen = HashSet::new();
        for task in tasks {
            for oid in task.await.expect("join") {
                assert!(seen.insert(oid));
            }
        }
        assert_eq!(seen.len(), 400);
    }

    #[test]
    fn test_select_class() {
        let u = ObjectClass::UNKNOWN;
        assert_eq!(select_class(ObjectClass::S2, ObjectClass::S1, u), ObjectClass::S2);
        assert_eq!(select_class(u, ObjectClass::S1, ObjectClass::SX), ObjectClass::S1);
        assert_eq!(select_class(u, u, ObjectClass::SX), ObjectClass::SX);
    }
}
