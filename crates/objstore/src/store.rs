// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use crate::oid::{ObjectClass, ObjectId, ObjectType};
use crate::types::*;
use async_trait::async_trait;

/// Flat transactional object store backing a namespace.
///
/// One value of this trait is an open container handle. Objects are
/// addressed by `ObjectId`; inside an object, records are addressed by a
/// dkey and then an akey. Every call taking a `Tx` may run inside a
/// transaction opened with `tx_open`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn container_uuid(&self) -> uuid7::Uuid;

    // Container properties

    async fn query_props(&self) -> Result<ContainerProps>;
    async fn set_props(&self, props: ContainerProps) -> Result<()>;

    /// Reserves `count` unique `lo` values, returning the first.
    async fn alloc_oids(&self, count: u64) -> Result<u64>;

    /// Stamps type and class bits on a caller-chosen identifier.
    fn generate_oid(&self, oid: ObjectId, otype: ObjectType, class: ObjectClass) -> ObjectId {
        ObjectId::generate(oid.hi, oid.lo, otype, class)
    }

    async fn open_object(&self, oid: ObjectId, mode: OpenMode) -> Result<()>;
    async fn open_array(&self, oid: ObjectId, mode: OpenMode, chunk_size: u64) -> Result<()>;

    /// Drops one reference taken by `open_object` or `open_array`.
    /// Closing an object with no open references is a no-op.
    async fn close_object(&self, oid: ObjectId) -> Result<()>;

    // Records

    /// Fetches the listed akeys of one dkey. Absent akeys come back as
    /// `None` unless `cond` makes their absence an error.
    async fn fetch(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: FetchCond,
        iods: &[Iod],
    ) -> Result<Vec<Option<Vec<u8>>>>;

    /// Applies every akey write of one dkey atomically.
    async fn update(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: UpdateCond,
        values: Vec<AkeyUpdate>,
    ) -> Result<()>;

    async fn punch_dkey(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: PunchCond,
    ) -> Result<()>;

    async fn punch_akeys(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        akeys: &[Vec<u8>],
        cond: PunchCond,
    ) -> Result<()>;

    async fn punch_object(&self, tx: Tx, oid: ObjectId) -> Result<()>;

    /// Lists up to `max` dkeys after `anchor`, in key order.
    async fn list_dkeys(
        &self,
        tx: Tx,
        oid: ObjectId,
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<Vec<u8>>>;

    async fn list_akeys(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<Vec<u8>>>;

    /// Epoch of the last write to the object, 0 if never written.
    async fn query_max_epoch(&self, tx: Tx, oid: ObjectId) -> Result<Epoch>;

    /// End offset (`idx + nr`) of the highest extent in an array akey.
    async fn query_max_offset(&self, oid: ObjectId, dkey: &[u8], akey: &[u8]) -> Result<u64>;

    // Byte arrays

    async fn array_write(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<()>;

    /// Reads up to `len` bytes; the result stops at the array size.
    async fn array_read(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>>;

    async fn array_stat(&self, tx: Tx, oid: ObjectId, chunk_size: u64) -> Result<ArrayStat>;

    async fn array_set_size(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        size: u64,
    ) -> Result<()>;

    async fn array_punch(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        len: u64,
    ) -> Result<()>;

    // Transactions

    async fn tx_open(&self) -> Result<Tx>;

    /// Applies staged mutations. Fails with `Restart` when anything read
    /// under the transaction changed since it was read.
    async fn tx_commit(&self, tx: Tx) -> Result<()>;

    async fn tx_abort(&self, tx: Tx) -> Result<()>;

    // Snapshots and the object-ID table

    async fn create_snapshot(&self) -> Result<Epoch>;
    async fn destroy_snapshot(&self, epoch: Epoch) -> Result<()>;

    async fn oit_open(&self, epoch: Epoch) -> Result<OitHandle>;

    /// Marks an object as reachable. `NotFound` if it is not in the table.
    async fn oit_mark(&self, oit: OitHandle, oid: ObjectId) -> Result<()>;

    async fn oit_list_unmarked(
        &self,
        oit: OitHandle,
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<ObjectId>>;

    async fn oit_close(&self, oit: OitHandle) -> Result<()>;

    /// Checks replica consistency of one object at a snapshot.
    async fn obj_verify(&self, oid: ObjectId, epoch: Epoch) -> Result<()>;

    /// Revokes every open handle on the container.
    async fn evict_handles(&self) -> Result<()>;
}
