// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::oid::ObjectId;
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Single(Vec<u8>),
    Array(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectData {
    pub(crate) dkeys: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Value>>,
    pub(crate) epoch: Epoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VersionKey {
    Object(ObjectId),
    Dkey(ObjectId, Vec<u8>),
}

/// A mutation, applied immediately or staged in a transaction.
#[derive(Debug, Clone)]
enum Op {
    Update {
        oid: ObjectId,
        dkey: Vec<u8>,
        cond: UpdateCond,
        values: Vec<AkeyUpdate>,
    },
    PunchDkey {
        oid: ObjectId,
        dkey: Vec<u8>,
        cond: PunchCond,
    },
    PunchAkeys {
        oid: ObjectId,
        dkey: Vec<u8>,
        akeys: Vec<Vec<u8>>,
        cond: PunchCond,
    },
    PunchObject {
        oid: ObjectId,
    },
    ArrayWrite {
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        data: Vec<u8>,
    },
    ArraySetSize {
        oid: ObjectId,
        chunk_size: u64,
        size: u64,
    },
    ArrayPunch {
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        len: u64,
    },
}

#[derive(Debug, Default)]
struct PendingTx {
    reads: HashMap<VersionKey, u64>,
    ops: Vec<Op>,
}

#[derive(Debug)]
struct Oit {
    oids: BTreeSet<ObjectId>,
    marked: HashSet<ObjectId>,
}

/// Counters exposed to tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    pub opened: u64,
    pub committed: u64,
    pub restarted: u64,
    pub aborted: u64,
}

pub struct State {
    props: ContainerProps,
    next_lo: u64,
    hlc: Epoch,
    objects: HashMap<ObjectId, ObjectData>,
    versions: HashMap<VersionKey, u64>,
    version_seq: u64,
    txs: HashMap<u64, PendingTx>,
    next_tx: u64,
    pending_restarts: u32,
    tx_stats: TxStats,
    snapshots: BTreeMap<Epoch, BTreeSet<ObjectId>>,
    oits: HashMap<u64, Oit>,
    next_oit: u64,
    corrupted: HashSet<ObjectId>,
    verify_supported: bool,
    open_counts: HashMap<ObjectId, u64>,
    evictions: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            props: ContainerProps::default(),
            next_lo: 0,
            hlc: 0,
            objects: HashMap::new(),
            versions: HashMap::new(),
            version_seq: 0,
            txs: HashMap::new(),
            next_tx: 1,
            pending_restarts: 0,
            tx_stats: TxStats::default(),
            snapshots: BTreeMap::new(),
            oits: HashMap::new(),
            next_oit: 1,
            corrupted: HashSet::new(),
            verify_supported: true,
            open_counts: HashMap::new(),
            evictions: 0,
        }
    }
}

fn chunk_dkey(index: u64) -> Vec<u8> {
    (index + 1).to_le_bytes().to_vec()
}

fn chunk_index(dkey: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = dkey.try_into().ok()?;
    u64::from_le_bytes(raw).checked_sub(1)
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::invalid("offset out of range"))
}

fn write_bytes(buf: &mut Vec<u8>, offset: u64, data: &[u8]) -> Result<()> {
    let start = to_usize(offset)?;
    let end = start + data.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[start..end].copy_from_slice(data);
    Ok(())
}

fn read_bytes(buf: &[u8], offset: u64, len: u64) -> Result<Vec<u8>> {
    let start = to_usize(offset)?;
    let len = to_usize(len)?;
    let mut out = vec![0u8; len];
    if start < buf.len() {
        let avail = (buf.len() - start).min(len);
        out[..avail].copy_from_slice(&buf[start..start + avail]);
    }
    Ok(out)
}

/// Splits `[offset, offset+len)` into per-chunk pieces:
/// (chunk index, offset within chunk, offset within the request, length).
fn chunk_pieces(chunk_size: u64, offset: u64, len: u64) -> Result<Vec<(u64, u64, u64, u64)>> {
    if chunk_size == 0 {
        return Err(Error::invalid("chunk size must be non-zero"));
    }
    let mut pieces = Vec::new();
    let mut pos = offset;
    let end = offset
        .checked_add(len)
        .ok_or_else(|| Error::invalid("range overflows"))?;
    while pos < end {
        let index = pos / chunk_size;
        let within = pos % chunk_size;
        let take = (chunk_size - within).min(end - pos);
        pieces.push((index, within, pos - offset, take));
        pos += take;
    }
    Ok(pieces)
}

fn array_size(obj: &ObjectData, chunk_size: u64) -> u64 {
    obj.dkeys
        .iter()
        .filter_map(|(dkey, akeys)| {
            let index = chunk_index(dkey)?;
            match akeys.get(ARRAY_AKEY) {
                Some(Value::Array(bytes)) if !bytes.is_empty() => {
                    Some(index * chunk_size + bytes.len() as u64)
                }
                _ => None,
            }
        })
        .max()
        .unwrap_or(0)
}

/// Applies one mutation. Conditions are checked before anything changes.
/// Returns the keys whose version must move.
fn apply(
    objects: &mut HashMap<ObjectId, ObjectData>,
    op: Op,
    epoch: Epoch,
) -> Result<Vec<VersionKey>> {
    match op {
        Op::Update {
            oid,
            dkey,
            cond,
            values,
        } => {
            let existing = objects.get(&oid).and_then(|o| o.dkeys.get(&dkey));
            match (cond, existing.is_some()) {
                (UpdateCond::DkeyInsert, true) => return Err(Error::AlreadyExists),
                (UpdateCond::DkeyUpdate, false) => return Err(Error::NotFound),
                _ => {}
            }
            for v in &values {
                let present = existing.is_some_and(|akeys| akeys.contains_key(&v.akey));
                match (v.cond, present) {
                    (AkeyCond::Insert, true) => return Err(Error::AlreadyExists),
                    (AkeyCond::Update, false) => return Err(Error::NotFound),
                    _ => {}
                }
            }
            let obj = objects.entry(oid).or_default();
            let akeys = obj.dkeys.entry(dkey.clone()).or_default();
            for v in values {
                match v.value {
                    UpdateValue::Single(bytes) => {
                        _ = akeys.insert(v.akey, Value::Single(bytes));
                    }
                    UpdateValue::Extents(extents) => {
                        let slot = akeys
                            .entry(v.akey)
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Value::Single(_) = slot {
                            *slot = Value::Array(Vec::new());
                        }
                        if let Value::Array(buf) = slot {
                            for (offset, data) in extents {
                                write_bytes(buf, offset, &data)?;
                            }
                        }
                    }
                }
            }
            obj.epoch = epoch;
            Ok(vec![VersionKey::Object(oid), VersionKey::Dkey(oid, dkey)])
        }
        Op::PunchDkey { oid, dkey, cond } => {
            let removed = objects
                .get_mut(&oid)
                .and_then(|o| o.dkeys.remove(&dkey))
                .is_some();
            if !removed && cond == PunchCond::Exists {
                return Err(Error::NotFound);
            }
            if let Some(obj) = objects.get_mut(&oid) {
                obj.epoch = epoch;
            }
            Ok(vec![VersionKey::Object(oid), VersionKey::Dkey(oid, dkey)])
        }
        Op::PunchAkeys {
            oid,
            dkey,
            akeys,
            cond,
        } => {
            let record = objects.get_mut(&oid).and_then(|o| o.dkeys.get_mut(&dkey));
            let Some(record) = record else {
                return if cond == PunchCond::Exists {
                    Err(Error::NotFound)
                } else {
                    Ok(Vec::new())
                };
            };
            if cond == PunchCond::Exists && akeys.iter().any(|a| !record.contains_key(a)) {
                return Err(Error::NotFound);
            }
            for akey in &akeys {
                _ = record.remove(akey);
            }
            let empty = record.is_empty();
            if let Some(obj) = objects.get_mut(&oid) {
                if empty {
                    _ = obj.dkeys.remove(&dkey);
                }
                obj.epoch = epoch;
            }
            Ok(vec![VersionKey::Object(oid), VersionKey::Dkey(oid, dkey)])
        }
        Op::PunchObject { oid } => {
            let mut touched = vec![VersionKey::Object(oid)];
            if let Some(obj) = objects.remove(&oid) {
                touched.extend(obj.dkeys.into_keys().map(|d| VersionKey::Dkey(oid, d)));
            }
            Ok(touched)
        }
        Op::ArrayWrite {
            oid,
            chunk_size,
            offset,
            data,
        } => {
            let pieces = chunk_pieces(chunk_size, offset, data.len() as u64)?;
            let obj = objects.entry(oid).or_default();
            let mut touched = vec![VersionKey::Object(oid)];
            for (index, within, from, len) in pieces {
                let dkey = chunk_dkey(index);
                let slot = obj
                    .dkeys
                    .entry(dkey.clone())
                    .or_default()
                    .entry(ARRAY_AKEY.to_vec())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(buf) = slot {
                    let from = to_usize(from)?;
                    let to = from + to_usize(len)?;
                    write_bytes(buf, within, &data[from..to])?;
                }
                touched.push(VersionKey::Dkey(oid, dkey));
            }
            obj.epoch = epoch;
            Ok(touched)
        }
        Op::ArraySetSize {
            oid,
            chunk_size,
            size,
        } => {
            if chunk_size == 0 {
                return Err(Error::invalid("chunk size must be non-zero"));
            }
            let obj = objects.entry(oid).or_default();
            let current = array_size(obj, chunk_size);
            let mut touched = vec![VersionKey::Object(oid)];
            if size < current {
                let mut drop = Vec::new();
                for (dkey, akeys) in obj.dkeys.iter_mut() {
                    let Some(index) = chunk_index(dkey) else {
                        continue;
                    };
                    let start = index * chunk_size;
                    if start >= size {
                        drop.push(dkey.clone());
                    } else if let Some(Value::Array(buf)) = akeys.get_mut(ARRAY_AKEY) {
                        let keep = to_usize(size - start)?;
                        if buf.len() > keep {
                            buf.truncate(keep);
                            touched.push(VersionKey::Dkey(oid, dkey.clone()));
                        }
                    }
                }
                for dkey in drop {
                    _ = obj.dkeys.remove(&dkey);
                    touched.push(VersionKey::Dkey(oid, dkey));
                }
            } else if size > current {
                // Extending leaves a hole ending in one written zero byte.
                let last = size - 1;
                let dkey = chunk_dkey(last / chunk_size);
                let slot = obj
                    .dkeys
                    .entry(dkey.clone())
                    .or_default()
                    .entry(ARRAY_AKEY.to_vec())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(buf) = slot {
                    write_bytes(buf, last % chunk_size, &[0])?;
                }
                touched.push(VersionKey::Dkey(oid, dkey));
            }
            obj.epoch = epoch;
            Ok(touched)
        }
        Op::ArrayPunch {
            oid,
            chunk_size,
            offset,
            len,
        } => {
            let pieces = chunk_pieces(chunk_size, offset, len)?;
            let Some(obj) = objects.get_mut(&oid) else {
                return Ok(Vec::new());
            };
            let mut touched = vec![VersionKey::Object(oid)];
            for (index, within, _, len) in pieces {
                let dkey = chunk_dkey(index);
                if let Some(Value::Array(buf)) = obj
                    .dkeys
                    .get_mut(&dkey)
                    .and_then(|akeys| akeys.get_mut(ARRAY_AKEY))
                {
                    let start = to_usize(within)?.min(buf.len());
                    let end = (to_usize(within)? + to_usize(len)?).min(buf.len());
                    buf[start..end].fill(0);
                    touched.push(VersionKey::Dkey(oid, dkey));
                }
            }
            obj.epoch = epoch;
            Ok(touched)
        }
    }
}

impl State {
    fn next_hlc(&mut self) -> Epoch {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0);
        self.hlc = now.max(self.hlc + 1);
        self.hlc
    }

    fn version(&self, key: &VersionKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, touched: Vec<VersionKey>) {
        for key in touched {
            self.version_seq += 1;
            _ = self.versions.insert(key, self.version_seq);
        }
    }

    fn record_read(&mut self, tx: Tx, key: VersionKey) -> Result<()> {
        let Tx::Open(id) = tx else {
            return Ok(());
        };
        let version = self.version(&key);
        let pending = self
            .txs
            .get_mut(&id)
            .ok_or_else(|| Error::invalid("unknown transaction"))?;
        _ = pending.reads.entry(key).or_insert(version);
        Ok(())
    }

    fn submit(&mut self, tx: Tx, op: Op) -> Result<()> {
        match tx {
            Tx::None => {
                let epoch = self.next_hlc();
                let touched = apply(&mut self.objects, op, epoch)?;
                self.bump(touched);
                Ok(())
            }
            Tx::Open(id) => {
                let pending = self
                    .txs
                    .get_mut(&id)
                    .ok_or_else(|| Error::invalid("unknown transaction"))?;
                pending.ops.push(op);
                Ok(())
            }
        }
    }

    // Container

    pub fn query_props(&self) -> ContainerProps {
        self.props.clone()
    }

    pub fn set_props(&mut self, props: ContainerProps) {
        self.props = props;
    }

    pub fn alloc_oids(&mut self, count: u64) -> Result<u64> {
        if count == 0 {
            return Err(Error::invalid("cannot reserve zero identifiers"));
        }
        let lo = self.next_lo;
        self.next_lo = lo
            .checked_add(count)
            .ok_or_else(|| Error::io("object identifier space exhausted"))?;
        Ok(lo)
    }

    pub fn open(&mut self, oid: ObjectId) {
        *self.open_counts.entry(oid).or_insert(0) += 1;
    }

    pub fn close(&mut self, oid: ObjectId) {
        if let Some(count) = self.open_counts.get_mut(&oid) {
            *count -= 1;
            if *count == 0 {
                _ = self.open_counts.remove(&oid);
            }
        }
    }

    // Records

    pub fn fetch(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: FetchCond,
        iods: &[Iod],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        self.record_read(tx, VersionKey::Dkey(oid, dkey.to_vec()))?;
        let record = self.objects.get(&oid).and_then(|o| o.dkeys.get(dkey));
        let Some(record) = record else {
            return match cond {
                FetchCond::None => Ok(vec![None; iods.len()]),
                FetchCond::Dkey | FetchCond::Akey => Err(Error::NotFound),
            };
        };
        let mut out = Vec::with_capacity(iods.len());
        for iod in iods {
            let value = match (record.get(&iod.akey), iod.kind) {
                (None, _) => None,
                (Some(Value::Single(bytes)), IodKind::Single) => Some(bytes.clone()),
                (Some(Value::Array(bytes)), IodKind::Single) => Some(bytes.clone()),
                (Some(Value::Array(bytes)), IodKind::Range { offset, len }) => {
                    Some(read_bytes(bytes, offset, len)?)
                }
                (Some(Value::Single(_)), IodKind::Range { .. }) => {
                    return Err(Error::invalid("range fetch of a single value"));
                }
            };
            if value.is_none() && cond == FetchCond::Akey {
                return Err(Error::NotFound);
            }
            out.push(value);
        }
        Ok(out)
    }

    pub fn update(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        cond: UpdateCond,
        values: Vec<AkeyUpdate>,
    ) -> Result<()> {
        self.submit(
            tx,
            Op::Update {
                oid,
                dkey: dkey.to_vec(),
                cond,
                values,
            },
        )
    }

    pub fn punch_dkey(&mut self, tx: Tx, oid: ObjectId, dkey: &[u8], cond: PunchCond) -> Result<()> {
        self.submit(
            tx,
            Op::PunchDkey {
                oid,
                dkey: dkey.to_vec(),
                cond,
            },
        )
    }

    pub fn punch_akeys(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        akeys: &[Vec<u8>],
        cond: PunchCond,
    ) -> Result<()> {
        self.submit(
            tx,
            Op::PunchAkeys {
                oid,
                dkey: dkey.to_vec(),
                akeys: akeys.to_vec(),
                cond,
            },
        )
    }

    pub fn punch_object(&mut self, tx: Tx, oid: ObjectId) -> Result<()> {
        self.submit(tx, Op::PunchObject { oid })
    }

    pub fn list_dkeys(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.record_read(tx, VersionKey::Object(oid))?;
        let Some(obj) = self.objects.get(&oid) else {
            anchor.advance(None, true);
            return Ok(Vec::new());
        };
        Ok(page(obj.dkeys.keys(), anchor, max))
    }

    pub fn list_akeys(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        dkey: &[u8],
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.record_read(tx, VersionKey::Dkey(oid, dkey.to_vec()))?;
        let Some(record) = self.objects.get(&oid).and_then(|o| o.dkeys.get(dkey)) else {
            anchor.advance(None, true);
            return Ok(Vec::new());
        };
        Ok(page(record.keys(), anchor, max))
    }

    pub fn query_max_epoch(&mut self, tx: Tx, oid: ObjectId) -> Result<Epoch> {
        self.record_read(tx, VersionKey::Object(oid))?;
        Ok(self.objects.get(&oid).map_or(0, |o| o.epoch))
    }

    pub fn query_max_offset(&self, oid: ObjectId, dkey: &[u8], akey: &[u8]) -> Result<u64> {
        match self
            .objects
            .get(&oid)
            .and_then(|o| o.dkeys.get(dkey))
            .and_then(|r| r.get(akey))
        {
            Some(Value::Array(bytes)) => Ok(bytes.len() as u64),
            Some(Value::Single(_)) => Err(Error::invalid("not an array value")),
            None => Err(Error::NotFound),
        }
    }

    // Arrays

    pub fn array_write(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        self.submit(
            tx,
            Op::ArrayWrite {
                oid,
                chunk_size,
                offset,
                data: data.to_vec(),
            },
        )
    }

    pub fn array_read(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        self.record_read(tx, VersionKey::Object(oid))?;
        let Some(obj) = self.objects.get(&oid) else {
            return Ok(Vec::new());
        };
        let size = array_size(obj, chunk_size);
        if offset >= size {
            return Ok(Vec::new());
        }
        let len = len.min(size - offset);
        let mut out = vec![0u8; to_usize(len)?];
        for (index, within, from, take) in chunk_pieces(chunk_size, offset, len)? {
            if let Some(Value::Array(buf)) = obj
                .dkeys
                .get(&chunk_dkey(index))
                .and_then(|akeys| akeys.get(ARRAY_AKEY))
            {
                let bytes = read_bytes(buf, within, take)?;
                let from = to_usize(from)?;
                out[from..from + bytes.len()].copy_from_slice(&bytes);
            }
        }
        Ok(out)
    }

    pub fn array_stat(&mut self, tx: Tx, oid: ObjectId, chunk_size: u64) -> Result<ArrayStat> {
        if chunk_size == 0 {
            return Err(Error::invalid("chunk size must be non-zero"));
        }
        self.record_read(tx, VersionKey::Object(oid))?;
        Ok(self
            .objects
            .get(&oid)
            .map(|obj| ArrayStat {
                size: array_size(obj, chunk_size),
                max_epoch: obj.epoch,
            })
            .unwrap_or_default())
    }

    pub fn array_set_size(&mut self, tx: Tx, oid: ObjectId, chunk_size: u64, size: u64) -> Result<()> {
        self.submit(
            tx,
            Op::ArraySetSize {
                oid,
                chunk_size,
                size,
            },
        )
    }

    pub fn array_punch(
        &mut self,
        tx: Tx,
        oid: ObjectId,
        chunk_size: u64,
        offset: u64,
        len: u64,
    ) -> Result<()> {
        self.submit(
            tx,
            Op::ArrayPunch {
                oid,
                chunk_size,
                offset,
                len,
            },
        )
    }

    // Transactions

    pub fn tx_open(&mut self) -> Tx {
        let id = self.next_tx;
        self.next_tx += 1;
        _ = self.txs.insert(id, PendingTx::default());
        self.tx_stats.opened += 1;
        Tx::Open(id)
    }

    pub fn tx_commit(&mut self, tx: Tx) -> Result<()> {
        let Tx::Open(id) = tx else {
            return Err(Error::invalid("no transaction to commit"));
        };
        let pending = self
            .txs
            .remove(&id)
            .ok_or_else(|| Error::invalid("unknown transaction"))?;

        if self.pending_restarts > 0 {
            self.pending_restarts -= 1;
            self.tx_stats.restarted += 1;
            return Err(Error::Restart);
        }
        if pending
            .reads
            .iter()
            .any(|(key, seen)| self.version(key) != *seen)
        {
            self.tx_stats.restarted += 1;
            return Err(Error::Restart);
        }

        let epoch = self.next_hlc();
        let mut scratch = self.objects.clone();
        let mut touched = Vec::new();
        for op in pending.ops {
            touched.extend(apply(&mut scratch, op, epoch)?);
        }
        self.objects = scratch;
        self.bump(touched);
        self.tx_stats.committed += 1;
        Ok(())
    }

    pub fn tx_abort(&mut self, tx: Tx) -> Result<()> {
        let Tx::Open(id) = tx else {
            return Err(Error::invalid("no transaction to abort"));
        };
        if self.txs.remove(&id).is_some() {
            self.tx_stats.aborted += 1;
        }
        Ok(())
    }

    // Snapshots and OIT

    pub fn create_snapshot(&mut self) -> Epoch {
        let epoch = self.next_hlc();
        let oids = self.objects.keys().copied().collect();
        _ = self.snapshots.insert(epoch, oids);
        epoch
    }

    pub fn destroy_snapshot(&mut self, epoch: Epoch) -> Result<()> {
        self.snapshots
            .remove(&epoch)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    pub fn oit_open(&mut self, epoch: Epoch) -> Result<OitHandle> {
        let oids = self.snapshots.get(&epoch).cloned().ok_or(Error::NotFound)?;
        let id = self.next_oit;
        self.next_oit += 1;
        _ = self.oits.insert(
            id,
            Oit {
                oids,
                marked: HashSet::new(),
            },
        );
        Ok(OitHandle(id))
    }

    pub fn oit_mark(&mut self, oit: OitHandle, oid: ObjectId) -> Result<()> {
        let table = self
            .oits
            .get_mut(&oit.0)
            .ok_or_else(|| Error::invalid("unknown OIT handle"))?;
        if !table.oids.contains(&oid) {
            return Err(Error::NotFound);
        }
        _ = table.marked.insert(oid);
        Ok(())
    }

    pub fn oit_list_unmarked(
        &mut self,
        oit: OitHandle,
        anchor: &mut Anchor,
        max: usize,
    ) -> Result<Vec<ObjectId>> {
        let table = self
            .oits
            .get(&oit.0)
            .ok_or_else(|| Error::invalid("unknown OIT handle"))?;
        let start = match anchor.last_key() {
            Some(key) => Bound::Excluded(
                ObjectId::from_key(key).ok_or_else(|| Error::invalid("bad OIT anchor"))?,
            ),
            None => Bound::Unbounded,
        };
        let mut out = Vec::new();
        let mut iter = table
            .oids
            .range((start, Bound::Unbounded))
            .filter(|oid| !table.marked.contains(oid))
            .peekable();
        while out.len() < max {
            match iter.next() {
                Some(oid) => out.push(*oid),
                None => break,
            }
        }
        let eof = iter.peek().is_none();
        anchor.advance(out.last().map(|oid| oid.to_key().to_vec()), eof);
        Ok(out)
    }

    pub fn oit_close(&mut self, oit: OitHandle) -> Result<()> {
        self.oits
            .remove(&oit.0)
            .map(|_| ())
            .ok_or_else(|| Error::invalid("unknown OIT handle"))
    }

    pub fn obj_verify(&self, oid: ObjectId, epoch: Epoch) -> Result<()> {
        if !self.verify_supported {
            return Err(Error::NotSupported);
        }
        if !self.snapshots.contains_key(&epoch) {
            return Err(Error::NotFound);
        }
        if self.corrupted.contains(&oid) {
            return Err(Error::Mismatch);
        }
        Ok(())
    }

    pub fn evict_handles(&mut self) {
        self.open_counts.clear();
        self.evictions += 1;
    }

    // Test hooks

    pub fn inject_restarts(&mut self, count: u32) {
        self.pending_restarts = count;
    }

    pub fn corrupt(&mut self, oid: ObjectId) {
        _ = self.corrupted.insert(oid);
    }

    pub fn set_verify_supported(&mut self, supported: bool) {
        self.verify_supported = supported;
    }

    pub fn object_exists(&self, oid: ObjectId) -> bool {
        self.objects.contains_key(&oid)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn open_count(&self, oid: ObjectId) -> u64 {
        self.open_counts.get(&oid).copied().unwrap_or(0)
    }

    pub fn open_total(&self) -> u64 {
        self.open_counts.values().sum()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn tx_stats(&self) -> TxStats {
        self.tx_stats
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }
}

fn page<'a, I>(keys: I, anchor: &mut Anchor, max: usize) -> Vec<Vec<u8>>
where
    I: Iterator<Item = &'a Vec<u8>>,
{
    let after = anchor.last_key().map(<[u8]>::to_vec);
    let mut iter = keys
        .filter(|k| after.as_ref().is_none_or(|a| k.as_slice() > a.as_slice()))
        .peekable();
    let mut out = Vec::new();
    while out.len() < max {
        match iter.next() {
            Some(k) => out.push(k.clone()),
            None => break,
        }
    }
    let eof = iter.peek().is_none();
    anchor.advance(out.last().cloned(), eof);
    out
}
