// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Superblock record and namespace attributes

use crate::entry::Layout;
use crate::error::{Error, Result};
use diagnostics::*;
use objstore::{
    AkeyUpdate, ClassHint, FetchCond, Iod, ObjectClass, ObjectId, ObjectStore, ObjectType,
    PunchCond, Tx, UpdateCond,
};
use serde::{Deserialize, Serialize};

pub const SB_DKEY: &[u8] = b"OBJFS_SB_METADATA";
const MAGIC_AKEY: &[u8] = b"OBJFS_MAGIC";
const SB_VERSION_AKEY: &[u8] = b"OBJFS_SB_VERSION";
pub(crate) const LAYOUT_VERSION_AKEY: &[u8] = b"OBJFS_LAYOUT_VERSION";
const CHUNK_SIZE_AKEY: &[u8] = b"OBJFS_CHUNK_SIZE";
const OCLASS_AKEY: &[u8] = b"OBJFS_OBJ_CLASS";
const FILE_OCLASS_AKEY: &[u8] = b"OBJFS_FILE_OBJ_CLASS";
const DIR_OCLASS_AKEY: &[u8] = b"OBJFS_DIR_OBJ_CLASS";
const MODE_AKEY: &[u8] = b"OBJFS_MODE";
const HINTS_AKEY: &[u8] = b"OBJFS_HINTS";

pub const MAGIC: u64 = 0xda05_df50_da05_df50;
pub const SB_VERSION: u16 = 2;
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Dkey of the root entry inside the superblock object.
pub const ROOT_NAME: &str = "/";

pub(crate) const SB_HI: u64 = 0;
pub(crate) const ROOT_HI: u64 = 1;
pub(crate) const RESERVED_LO: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    /// Each step is an independent conditional operation.
    #[default]
    Relaxed,
    /// Multi-record operations run in one transaction.
    Balanced,
}

impl ConsistencyMode {
    fn code(self) -> u32 {
        match self {
            ConsistencyMode::Relaxed => 0,
            ConsistencyMode::Balanced => 1,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(ConsistencyMode::Relaxed),
            1 => Ok(ConsistencyMode::Balanced),
            other => Err(Error::invalid(format!("unknown consistency mode {other}"))),
        }
    }
}

/// Namespace attributes fixed when a container is formatted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceAttr {
    /// Caller-defined identifier carried through hand-off.
    pub id: u64,
    /// Default file chunk size; 0 selects `DEFAULT_CHUNK_SIZE`.
    pub chunk_size: u64,
    pub oclass: ObjectClass,
    pub dir_oclass: ObjectClass,
    pub file_oclass: ObjectClass,
    pub mode: ConsistencyMode,
    /// Sharding hints, e.g. `"dir:single,file:max"`.
    pub hints: String,
}

/// Parsed form of the hints string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hints {
    pub dir: Option<ClassHint>,
    pub file: Option<ClassHint>,
}

impl Hints {
    pub fn parse(hints: &str) -> Result<Hints> {
        let mut parsed = Hints::default();
        for hint in hints.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            let (kind, value) = hint
                .split_once(':')
                .ok_or_else(|| Error::invalid(format!("malformed hint {hint}")))?;
            let class = match value.to_ascii_lowercase().as_str() {
                "single" => ClassHint::Single,
                "max" => ClassHint::Max,
                other => return Err(Error::invalid(format!("unknown hint value {other}"))),
            };
            match kind.to_ascii_lowercase().as_str() {
                "dir" | "directory" => parsed.dir = Some(class),
                "file" => parsed.file = Some(class),
                other => return Err(Error::invalid(format!("unknown hint type {other}"))),
            }
        }
        Ok(parsed)
    }
}

impl NamespaceAttr {
    /// Parses attributes from JSON, as found in a configuration file.
    pub fn from_json(json: &str) -> Result<NamespaceAttr> {
        serde_json::from_str(json).map_err(|e| Error::invalid(format!("namespace attributes: {e}")))
    }

    #[must_use]
    pub fn effective_chunk_size(&self) -> u64 {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    pub fn hints(&self) -> Result<Hints> {
        Hints::parse(&self.hints)
    }

    /// Class for new directories when neither caller nor parent picks one.
    #[must_use]
    pub fn default_dir_class(&self) -> ObjectClass {
        self.pick(self.dir_oclass, self.hints().ok().and_then(|h| h.dir))
    }

    /// Class for new files when the caller picks none.
    #[must_use]
    pub fn default_file_class(&self) -> ObjectClass {
        self.pick(self.file_oclass, self.hints().ok().and_then(|h| h.file))
    }

    fn pick(&self, specific: ObjectClass, hint: Option<ClassHint>) -> ObjectClass {
        if !specific.is_unknown() {
            specific
        } else if !self.oclass.is_unknown() {
            self.oclass
        } else {
            hint.map_or(ObjectClass::SX, ClassHint::class)
        }
    }
}

/// Superblock and root identifiers for a container with this dir class.
#[must_use]
pub fn root_oids(dir_class: ObjectClass) -> [ObjectId; 2] {
    [
        ObjectId::generate(SB_HI, RESERVED_LO, ObjectType::MultiHashed, dir_class),
        ObjectId::generate(ROOT_HI, RESERVED_LO, ObjectType::MultiHashed, dir_class),
    ]
}

/// Writes a new superblock. Fails with `AlreadyExists` if one is present.
pub async fn write(store: &dyn ObjectStore, sb_oid: ObjectId, attr: &NamespaceAttr) -> Result<()> {
    _ = attr.hints()?;
    let mut values = vec![
        AkeyUpdate::single(MAGIC_AKEY, MAGIC.to_le_bytes().to_vec()),
        AkeyUpdate::single(SB_VERSION_AKEY, SB_VERSION.to_le_bytes().to_vec()),
        AkeyUpdate::single(
            LAYOUT_VERSION_AKEY,
            Layout::CURRENT.version().to_le_bytes().to_vec(),
        ),
        AkeyUpdate::single(
            CHUNK_SIZE_AKEY,
            attr.effective_chunk_size().to_le_bytes().to_vec(),
        ),
        AkeyUpdate::single(OCLASS_AKEY, u32::from(attr.oclass).to_le_bytes().to_vec()),
        AkeyUpdate::single(
            FILE_OCLASS_AKEY,
            u32::from(attr.file_oclass).to_le_bytes().to_vec(),
        ),
        AkeyUpdate::single(
            DIR_OCLASS_AKEY,
            u32::from(attr.dir_oclass).to_le_bytes().to_vec(),
        ),
        AkeyUpdate::single(MODE_AKEY, attr.mode.code().to_le_bytes().to_vec()),
    ];
    if !attr.hints.is_empty() {
        values.push(AkeyUpdate::single(HINTS_AKEY, attr.hints.as_bytes().to_vec()));
    }
    store
        .update(Tx::None, sb_oid, SB_DKEY, UpdateCond::DkeyInsert, values)
        .await?;
    debug!("Wrote superblock {oid}", oid: sb_oid.to_string());
    Ok(())
}

/// Removes the superblock record, if any.
pub async fn punch(store: &dyn ObjectStore, sb_oid: ObjectId) -> Result<()> {
    store
        .punch_dkey(Tx::None, sb_oid, SB_DKEY, PunchCond::None)
        .await?;
    Ok(())
}

fn fixed<const N: usize>(raw: Option<Vec<u8>>, what: &str) -> Result<[u8; N]> {
    raw.and_then(|v| v.try_into().ok())
        .ok_or_else(|| Error::invalid(format!("superblock {what} has wrong size")))
}

/// Reads and validates the superblock, returning the entry layout and
/// the stored attributes.
pub async fn read(store: &dyn ObjectStore, sb_oid: ObjectId) -> Result<(Layout, NamespaceAttr)> {
    let iods: Vec<Iod> = [
        MAGIC_AKEY,
        SB_VERSION_AKEY,
        LAYOUT_VERSION_AKEY,
        CHUNK_SIZE_AKEY,
        OCLASS_AKEY,
        FILE_OCLASS_AKEY,
        DIR_OCLASS_AKEY,
        MODE_AKEY,
        HINTS_AKEY,
    ]
    .into_iter()
    .map(Iod::single)
    .collect();

    let mut values = store
        .fetch(Tx::None, sb_oid, SB_DKEY, FetchCond::None, &iods)
        .await?
        .into_iter();
    let mut next = || values.next().flatten();

    let Some(magic) = next() else {
        return Err(Error::not_found("superblock"));
    };
    if fixed::<8>(Some(magic), "magic").map(u64::from_le_bytes)? != MAGIC {
        return Err(Error::invalid("superblock magic mismatch"));
    }
    let sb_version = u16::from_le_bytes(fixed(next(), "version")?);
    if sb_version > SB_VERSION {
        return Err(Error::invalid(format!(
            "incompatible superblock version {sb_version}"
        )));
    }
    let layout = Layout::for_version(u16::from_le_bytes(fixed(next(), "layout version")?))?;
    let chunk_size = u64::from_le_bytes(fixed(next(), "chunk size")?);
    let oclass = ObjectClass::from(u32::from_le_bytes(fixed(next(), "object class")?));
    let file_oclass = ObjectClass::from(u32::from_le_bytes(fixed(next(), "file class")?));
    let dir_oclass = ObjectClass::from(u32::from_le_bytes(fixed(next(), "dir class")?));
    let mode = ConsistencyMode::from_code(u32::from_le_bytes(fixed(next(), "mode")?))?;
    let hints = match next() {
        Some(raw) => String::from_utf8(raw).map_err(|_| Error::invalid("superblock hints"))?,
        None => String::new(),
    };

    let attr = NamespaceAttr {
        id: 0,
        chunk_size: if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        },
        oclass,
        dir_oclass,
        file_oclass,
        mode,
        hints,
    };
    Ok((layout, attr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use objstore::MemoryStore;

    #[test]
    fn test_hints_parse() {
        let hints = Hints::parse("dir:single, file:MAX").expect("parse");
        assert_eq!(hints.dir, Some(ClassHint::Single));
        assert_eq!(hints.file, Some(ClassHint::Max));
        assert_eq!(Hints::parse("").expect("empty"), Hints::default());
        assert!(Hints::parse("dir").is_err());
        assert!(Hints::parse("pipe:max").is_err());
        assert!(Hints::parse("file:medium").is_err());
    }

    #[test]
    fn test_attr_from_json() {
        let attr = NamespaceAttr::from_json(r#"{"chunk_size": 4096, "mode": "balanced"}"#)
            .expect("json");
        assert_eq!(attr.chunk_size, 4096);
        assert_eq!(attr.mode, ConsistencyMode::Balanced);
        assert_eq!(attr.hints, "");
        assert!(NamespaceAttr::from_json("{\"mode\": \"eager\"}").is_err());
    }

    #[test]
    fn test_default_classes() {
        let mut attr = NamespaceAttr {
            hints: "dir:single".to_string(),
            ..NamespaceAttr::default()
        };
        assert_eq!(attr.default_dir_class(), ObjectClass::S1);
        assert_eq!(attr.default_file_class(), ObjectClass::SX);
        attr.oclass = ObjectClass::S2;
        assert_eq!(attr.default_dir_class(), ObjectClass::S2);
        attr.file_oclass = ObjectClass::S1;
        assert_eq!(attr.default_file_class(), ObjectClass::S1);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = MemoryStore::new();
        let [sb, _] = root_oids(ObjectClass::S1);
        let attr = NamespaceAttr {
            chunk_size: 0,
            mode: ConsistencyMode::Balanced,
            hints: "file:max".to_string(),
            ..NamespaceAttr::default()
        };
        write(&store, sb, &attr).await.expect("write");
        let err = write(&store, sb, &attr).await.expect_err("second write");
        assert_eq!(err.errno(), libc::EEXIST);

        let (layout, read_back) = read(&store, sb).await.expect("read");
        assert_eq!(layout, Layout::V3);
        assert_eq!(read_back.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(read_back.mode, ConsistencyMode::Balanced);
        assert_eq!(read_back.hints, "file:max");
    }

    #[tokio::test]
    async fn test_missing_and_bad_magic() {
        let store = MemoryStore::new();
        let [sb, _] = root_oids(ObjectClass::S1);
        let err = read(&store, sb).await.expect_err("missing");
        assert_eq!(err.errno(), libc::ENOENT);

        store
            .update(
                Tx::None,
                sb,
                SB_DKEY,
                UpdateCond::None,
                vec![AkeyUpdate::single(MAGIC_AKEY, 7u64.to_le_bytes().to_vec())],
            )
            .await
            .expect("bad magic");
        let err = read(&store, sb).await.expect_err("magic");
        assert_eq!(err.errno(), libc::EINVAL);
    }
}
