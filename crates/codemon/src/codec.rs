//! Index-compressed serialization of the influence map.
//!
//! Test identifiers are long and repeat across many line entries, so each
//! distinct test is assigned a small integer and lines store indices only. The
//! assignment follows the first-appearance order of a full
//! [`InfluenceMap::suite`] traversal, which makes the encoding a pure function
//! of the map's logical content and file order.
//!
//! # Binary layout
//!
//! All integers are little-endian `u32`; strings are a `u32` byte length
//! followed by UTF-8 bytes.
//!
//! - `magic[4]` = `CDMN`
//! - `version`
//! - test count, then `(index, identifier)` pairs in ascending index order
//! - file count, then per file: path, line count, then per line:
//!   line number, index count, indices
//! - `crc32` of every preceding byte

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CodemonError, Result};
use crate::ids::{FileId, TestId};
use crate::influence_map::{FileInfluence, InfluenceMap, LineMap};
use crate::store::MapStore;

/// Magic bytes at the start of a persisted map (`"CDMN"`).
pub const MAP_MAGIC: [u8; 4] = *b"CDMN";
/// Current persisted map format version.
pub const MAP_FORMAT_VERSION: u32 = 1;

const CHECKSUM_BYTES: usize = 4;

/// One file's line table with tests replaced by their indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file: FileId,
    /// Line number -> ascending test indices
    pub lines: BTreeMap<u32, Vec<u32>>,
}

/// Persisted form of an [`InfluenceMap`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedMap {
    /// Per-file records in map order
    pub entries: Vec<FileRecord>,
    /// Test index -> identifier
    pub reverse_index: BTreeMap<u32, TestId>,
}

/// Compress `map` into index form.
pub fn serialize(map: &InfluenceMap) -> SerializedMap {
    // A full suite() traversal cannot fail: there is no filter to miss.
    let suite = map.suite(None).unwrap_or_default();

    let index: HashMap<&TestId, u32> = suite
        .iter()
        .enumerate()
        .map(|(i, test)| (test, i as u32))
        .collect();

    let entries = map
        .iter()
        .map(|influence| FileRecord {
            file: influence.file().clone(),
            lines: influence
                .lines()
                .iter()
                .map(|(&line, tests)| {
                    let mut indices: Vec<u32> =
                        tests.iter().filter_map(|t| index.get(t).copied()).collect();
                    indices.sort_unstable();
                    (line, indices)
                })
                .collect(),
        })
        .collect();

    let reverse_index = suite
        .into_iter()
        .enumerate()
        .map(|(i, test)| (i as u32, test))
        .collect();

    SerializedMap {
        entries,
        reverse_index,
    }
}

/// Expand index form back into an [`InfluenceMap`], preserving file order.
///
/// An index with no reverse-index entry, a line numbered 0, or a file listed
/// twice is `CorruptData`.
pub fn deserialize(serialized: &SerializedMap) -> Result<InfluenceMap> {
    let mut map = InfluenceMap::new();

    for record in &serialized.entries {
        if map.contains(&record.file) {
            return Err(CodemonError::corrupt(format!(
                "file listed twice: {}",
                record.file
            )));
        }

        let mut lines = LineMap::new();
        for (&line, indices) in &record.lines {
            if line == 0 {
                return Err(CodemonError::corrupt(format!(
                    "line 0 recorded for {}",
                    record.file
                )));
            }
            let tests = indices
                .iter()
                .map(|index| {
                    serialized.reverse_index.get(index).cloned().ok_or_else(|| {
                        CodemonError::corrupt(format!(
                            "unmapped test index {} at {}:{}",
                            index, record.file, line
                        ))
                    })
                })
                .collect::<Result<BTreeSet<TestId>>>()?;
            lines.insert(line, tests);
        }

        map.insert_influence(FileInfluence::with_lines(record.file.clone(), lines));
    }

    Ok(map)
}

/// Encode to the binary layout described in the module docs.
pub fn encode(serialized: &SerializedMap) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAP_MAGIC);
    put_u32(&mut out, MAP_FORMAT_VERSION);

    put_len(&mut out, serialized.reverse_index.len());
    for (&index, test) in &serialized.reverse_index {
        put_u32(&mut out, index);
        put_str(&mut out, test.as_str());
    }

    put_len(&mut out, serialized.entries.len());
    for record in &serialized.entries {
        put_str(&mut out, record.file.as_str());
        put_len(&mut out, record.lines.len());
        for (&line, indices) in &record.lines {
            put_u32(&mut out, line);
            put_len(&mut out, indices.len());
            for &index in indices {
                put_u32(&mut out, index);
            }
        }
    }

    let checksum = crc32fast::hash(&out);
    put_u32(&mut out, checksum);
    out
}

/// Decode and validate a binary payload produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<SerializedMap> {
    if bytes.len() < MAP_MAGIC.len() + 4 + CHECKSUM_BYTES {
        return Err(CodemonError::corrupt(format!(
            "payload too short: {} bytes",
            bytes.len()
        )));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_BYTES);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(CodemonError::corrupt(format!(
            "checksum mismatch: stored {stored:#010X}, computed {computed:#010X}"
        )));
    }

    let mut reader = Reader::new(body);
    let magic = reader.take(MAP_MAGIC.len(), "magic")?;
    if magic != &MAP_MAGIC[..] {
        return Err(CodemonError::corrupt(format!("invalid magic: {magic:02X?}")));
    }
    let version = reader.u32("version")?;
    if version != MAP_FORMAT_VERSION {
        return Err(CodemonError::corrupt(format!(
            "unsupported format version {version}, expected {MAP_FORMAT_VERSION}"
        )));
    }

    let mut reverse_index = BTreeMap::new();
    let test_count = reader.u32("test count")?;
    for _ in 0..test_count {
        let index = reader.u32("test index")?;
        let test = TestId::new(reader.string("test identifier")?);
        if reverse_index.insert(index, test).is_some() {
            return Err(CodemonError::corrupt(format!("duplicate test index {index}")));
        }
    }

    let file_count = reader.u32("file count")?;
    let mut entries = Vec::new();
    for _ in 0..file_count {
        let file = FileId::new(reader.string("file path")?);
        let line_count = reader.u32("line count")?;
        let mut lines = BTreeMap::new();
        for _ in 0..line_count {
            let line = reader.u32("line number")?;
            let index_count = reader.u32("index count")?;
            let indices = (0..index_count)
                .map(|_| reader.u32("test index"))
                .collect::<Result<Vec<u32>>>()?;
            lines.insert(line, indices);
        }
        entries.push(FileRecord { file, lines });
    }

    if !reader.is_exhausted() {
        return Err(CodemonError::corrupt(format!(
            "{} trailing bytes after file records",
            reader.remaining()
        )));
    }

    Ok(SerializedMap {
        entries,
        reverse_index,
    })
}

/// Serialize and encode in one step.
pub fn to_bytes(map: &InfluenceMap) -> Vec<u8> {
    encode(&serialize(map))
}

/// Decode and deserialize in one step.
pub fn from_bytes(bytes: &[u8]) -> Result<InfluenceMap> {
    deserialize(&decode(bytes)?)
}

/// Load the persisted map, degrading to an empty map when it is absent,
/// unreadable or corrupt.
pub fn load_map(store: &dyn MapStore) -> InfluenceMap {
    let bytes = match store.load() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            log::debug!("No persisted influence map found; starting empty");
            return InfluenceMap::new();
        }
        Err(e) => {
            log::warn!("Failed to read persisted influence map, starting empty: {}", e);
            return InfluenceMap::new();
        }
    };

    match from_bytes(&bytes) {
        Ok(map) => {
            log::info!("Loaded influence map with {} files", map.len());
            map
        }
        Err(e) => {
            log::warn!("Discarding persisted influence map: {}", e);
            InfluenceMap::new()
        }
    }
}

/// Encode `map` and write it through `store`.
pub fn save_map(store: &dyn MapStore, map: &InfluenceMap) -> Result<()> {
    let bytes = to_bytes(map);
    store.save(&bytes)?;
    log::info!(
        "Saved influence map ({} files, {} bytes)",
        map.len(),
        bytes.len()
    );
    Ok(())
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_len(out: &mut Vec<u8>, len: usize) {
    // Counts beyond u32 cannot come from a real coverage run.
    put_u32(out, u32::try_from(len).unwrap_or(u32::MAX));
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                CodemonError::corrupt(format!(
                    "truncated {what}: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.remaining()
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u32(what)? as usize;
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| CodemonError::corrupt(format!("invalid UTF-8 in {what}: {e}")))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
