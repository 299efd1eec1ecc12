// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory object store for testing and single-process use

mod state;

pub use state::TxStats;

use crate::error::Result;
use crate::oid::ObjectId;
use crate::store::ObjectStore;
use crate::types::*;
use async_trait::async_trait;
use diagnostics::*;
use state::State;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Object store kept in process memory.
///
/// Clones share one container, so several namespaces mounted from clones
/// of the same store observe each other's writes.
#[derive(Clone)]
pub struct MemoryStore {
    uuid: uuid7::Uuid,
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            uuid: uuid7::uuid7(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let store = Self::default();
        debug!("Created in-memory object store");
        store
    }

    /// Makes the next `count` commits fail with `Restart`.
    pub async fn inject_restarts(&self, count: u32) {
        self.state.lock().await.inject_restarts(count);
    }

    /// Makes `obj_verify` report a mismatch for this object.
    pub async fn corrupt(&self, oid: ObjectId) {
        self.state.lock().await.corrupt(oid);
    }

    pub async fn set_verify_supported(&self, supported: bool) {
        self.state.lock().await.set_verify_supported(supported);
    }

    pub async fn object_exists(&self, oid: ObjectId) -> bool {
        self.state.lock().await.object_exists(oid)
    }

    pub async fn object_count(&self) -> usize {
        self.state.lock().await.object_count()
    }

    pub async fn open_count(&self, oid: ObjectId) -> u64 {
        self.state.lock().await.open_count(oid)
    }

    /// Open references summed over every object.
    pub async fn open_total(&self) -> u64 {
        self.state.lock().await.open_total()
    }

    pub async fn evictions(&self) -> u64 {
        self.state.lock().await.evictions()
    }

    pub async fn tx_stats(&self) -> TxStats {
        self.state.lock().await.tx_stats()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.state.lock().await.snapshot_count()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn container_uuid(&self) -> uuid7::Uuid {
        self.uuid
    }

    async fn query_props(&self) -> Result<ContainerProps> {
        Ok(self.state.lock().await.query_props())
    }

    async fn set_props(&self, props: ContainerProps) -> Result<()> {
        self.state.lock().await.set_props(props);
        Ok(())
    }

    async fn alloc_oids(&self, count: u64) -> Result<u64> {
        self.state.lock().await.alloc_oids(count)
    }

    async fn open_object(&self, oid: ObjectId, _mode: OpenMode) -> Result<()> {
        self.state.lock().await.open(oid);
        Ok(())
    }

    async fn open_array(&self, oid: ObjectId, _mode: OpenMode, chunk_size: u64) -> Result<()> {
        if chunk_size == 0 {
            return Err(crate::Error::invalid("chunk size must be non-zero"));
        }
        self.state.lock().await.open(oid);
        Ok(())
    }

    async fn close_object(&self, oid: ObjectId) -> Result<()> {
        self.state.lock().await.close(oid);
        Ok(())
    }

    async fn fetch(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: FetchCond,
        iods: &[Iod],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        self.state.lock().await.fetch(tx, oid, dkey, cond, iods)
    }

    async fn update(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: UpdateCond,
        values: Vec<AkeyUpdate>,
    ) -> Result<()> {
        self.state.lock().await.update(tx, oid, dkey, cond, values)
    }

    async fn punch_dkey(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: PunchCond,
    ) -> Result<()> {
        self.state.lock().await.punch_dkey(tx, oid, dkey, cond)
    }

    async fn punch_akeys(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        akeys: &[Vec<u8>],
        cond: PunchCond,
    ) -> Result<()> {
        self.state.lock().await.punch_akeys(tx, oid, dkey, akeys, cond)
    }

    async fn punch_object(&self, tx: Tx, oid: ObjectId) -> Result<()> {
        self.state.lock().await.punch_object(tx, oid)
    }

    async fn list_dkeys(
        &self,
        tx: Tx,
        oid: ObjectId,
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.state.lock().await.list_dkeys(tx, oid, anchor, max)
    }

    async fn list_akeys(
        &self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.state.lock().await.list_akeys(tx, oid, dkey, anchor, max)
    }

    async fn query_max_epoch(&self, tx: Tx, oid: ObjectId) -> Result<Epoch> {
        self.state.lock().await.query_max_epoch(tx, oid)
    }

    async fn query_max_offset(&self, oid: ObjectId, dkey: &[u8], akey: &[u8]) -> Result<u64> {
        self.state.lock().await.query_max_offset(oid, dkey, akey)
    }

    async fn array_write(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .array_write(tx, oid, chunk_size, offset, data)
    }

    async fn array_read(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        self.state
            .lock()
            .await
            .array_read(tx, oid, chunk_size, offset, len)
    }

    async fn array_stat(&self, tx: Tx, oid: ObjectId, chunk_size: u64) -> Result<ArrayStat> {
        self.state.lock().await.array_stat(tx, oid, chunk_size)
    }

    async fn array_set_size(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        size: u64,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .array_set_size(tx, oid, chunk_size, size)
    }

    async fn array_punch(
        &self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        len: u64,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .array_punch(tx, oid, chunk_size, offset, len)
    }

    async fn tx_open(&self) -> Result<Tx> {
        Ok(self.state.lock().await.tx_open())
    }

    async fn tx_commit(&self, tx: Tx) -> Result<()> {
        self.state.lock().await.tx_commit(tx)
    }

    async fn tx_abort(&self, tx: Tx) -> Result<()> {
        self.state.lock().await.tx_abort(tx)
    }

    async fn create_snapshot(&self) -> Result<Epoch> {
        Ok(self.state.lock().await.create_snapshot())
    }

    async fn destroy_snapshot(&self, epoch: Epoch) -> Result<()> {
        self.state.lock().await.destroy_snapshot(epoch)
    }

    async fn oit_open(&self, epoch: Epoch) -> Result<OitHandle> {
        self.state.lock().await.oit_open(epoch)
    }

    async fn oit_mark(&self, oit: OitHandle, oid: ObjectId) -> Result<()> {
        self.state.lock().await.oit_mark(oit, oid)
    }

    async fn oit_list_unmarked(
        &self,
        oit: OitHandle,
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<ObjectId>> {
        self.state.lock().await.oit_list_unmarked(oit, anchor, max)
    }

    async fn oit_close(&self, oit: OitHandle) -> Result<()> {
        self.state.lock().await.oit_close(oit)
    }

    async fn obj_verify(&self, oid: ObjectId, epoch: Epoch) -> Result<()> {
        self.state.lock().await.obj_verify(oid, epoch)
    }

    async fn evict_handles(&self) -> Result<()> {
        self.state.lock().await.evict_handles();
        debug!("Evicted all open handles");
        Ok(())
    }
}
