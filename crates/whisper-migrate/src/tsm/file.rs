//! Block file format of the destination engine.
//!
//! One file holds every series written to one shard. Each `write` call
//! appends one data block under a series key; a key written twice owns two
//! blocks. `write_index` finalizes the file.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  File Header (32 bytes)                                      │
//! │  - Magic: "WTSM" (4 bytes)                                   │
//! │  - Version: u16 (2 bytes) = 1                                │
//! │  - Min Timestamp: i64 (8 bytes)                              │
//! │  - Max Timestamp: i64 (8 bytes)                              │
//! │  - Key Count: u32 (4 bytes)                                  │
//! │  - Compression: u8 (1 byte)                                  │
//! │  - Reserved: 5 bytes                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Data Blocks (one per write call)                            │
//! │  - Key, timestamps, values with block CRC                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Key Index                                                   │
//! │  - Key → blocks, sorted by key, with Bloom filter            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Footer (48 bytes)                                           │
//! │  - Offsets, sizes, CRC, reverse magic                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::tsm::codec;
use crate::tsm::Timestamp;

/// Magic bytes for the file header: "WTSM"
pub const TSM_MAGIC: [u8; 4] = *b"WTSM";

/// Reverse magic bytes for the file footer: "MSTW"
pub const TSM_MAGIC_REVERSE: [u8; 4] = *b"MSTW";

/// Current file format version.
pub const TSM_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 48;

/// Compression code for Gorilla-encoded blocks.
pub const COMPRESSION_GORILLA: u8 = 1;

const BLOOM_FILTER_DEFAULT_HASH_COUNT: u8 = 3;

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_magic<R: Read>(reader: &mut R, expected: [u8; 4]) -> Result<[u8; 4]> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != expected {
        return Err(MigrateError::InvalidMagic {
            expected,
            actual: magic,
        });
    }
    Ok(magic)
}

fn write_key<W: Write>(writer: &mut W, key: &str) -> Result<()> {
    let len = u16::try_from(key.len())
        .map_err(|_| MigrateError::Codec(format!("series key of {} bytes is too long", key.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(key.as_bytes())?;
    Ok(())
}

fn read_key<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u16(reader)? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| MigrateError::Codec(format!("series key is not UTF-8: {}", e)))
}

/// CRC32 of the first `len` bytes of the file at `path`.
fn crc_of_prefix(path: &Path, len: u64) -> Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = [0u8; 8192];
    let mut remaining = len;

    while remaining > 0 {
        let to_read = remaining.min(buffer.len() as u64) as usize;
        let n = file.read(&mut buffer[..to_read])?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }

    Ok(hasher.finalize())
}

/// File header (32 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsmHeader {
    /// File format version.
    pub version: u16,
    /// Minimum timestamp in the file.
    pub min_timestamp: Timestamp,
    /// Maximum timestamp in the file.
    pub max_timestamp: Timestamp,
    /// Number of distinct keys in the file.
    pub key_count: u32,
    /// Compression code of the data blocks.
    pub compression: u8,
}

impl Default for TsmHeader {
    fn default() -> Self {
        Self {
            version: TSM_VERSION,
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            key_count: 0,
            compression: COMPRESSION_GORILLA,
        }
    }
}

impl TsmHeader {
    /// Writes the header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&TSM_MAGIC)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.min_timestamp.to_le_bytes())?;
        writer.write_all(&self.max_timestamp.to_le_bytes())?;
        writer.write_all(&self.key_count.to_le_bytes())?;
        writer.write_all(&[self.compression])?;
        writer.write_all(&[0u8; 5])?;
        Ok(())
    }

    /// Reads a header.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::InvalidMagic`] if the magic bytes don't match and
    /// [`MigrateError::UnsupportedVersion`] for a newer format version.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        read_magic(reader, TSM_MAGIC)?;
        let version = read_u16(reader)?;
        if version > TSM_VERSION {
            return Err(MigrateError::UnsupportedVersion(version));
        }
        let min_timestamp = read_i64(reader)?;
        let max_timestamp = read_i64(reader)?;
        let key_count = read_u32(reader)?;
        let mut rest = [0u8; 6];
        reader.read_exact(&mut rest)?;

        Ok(Self {
            version,
            min_timestamp,
            max_timestamp,
            key_count,
            compression: rest[0],
        })
    }
}

/// File footer (48 bytes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsmFooter {
    /// Offset of the key index from file start.
    pub index_offset: u64,
    /// Size of the key index in bytes.
    pub index_size: u32,
    /// Offset of the data section from file start.
    pub data_offset: u64,
    /// Size of the data section in bytes.
    pub data_size: u64,
    /// Total number of points in the file.
    pub total_point_count: u64,
    /// CRC32 of everything before the footer.
    pub file_crc32: u32,
}

impl TsmFooter {
    /// Writes the footer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.index_offset.to_le_bytes())?;
        writer.write_all(&self.index_size.to_le_bytes())?;
        writer.write_all(&self.data_offset.to_le_bytes())?;
        writer.write_all(&self.data_size.to_le_bytes())?;
        writer.write_all(&self.total_point_count.to_le_bytes())?;
        writer.write_all(&self.file_crc32.to_le_bytes())?;
        writer.write_all(&TSM_MAGIC_REVERSE)?;
        writer.write_all(&[0u8; 4])?;
        Ok(())
    }

    /// Reads a footer.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::InvalidMagic`] if the reverse magic doesn't match.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let index_offset = read_u64(reader)?;
        let index_size = read_u32(reader)?;
        let data_offset = read_u64(reader)?;
        let data_size = read_u64(reader)?;
        let total_point_count = read_u64(reader)?;
        let file_crc32 = read_u32(reader)?;
        read_magic(reader, TSM_MAGIC_REVERSE)?;
        read_u32(reader)?;

        Ok(Self {
            index_offset,
            index_size,
            data_offset,
            data_size,
            total_point_count,
            file_crc32,
        })
    }
}

/// Location and bounds of one data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// Offset of the block from file start.
    pub offset: u64,
    /// Serialized size of the block.
    pub size: u32,
    /// Number of points.
    pub point_count: u32,
    /// Minimum timestamp in the block.
    pub min_ts: Timestamp,
    /// Maximum timestamp in the block.
    pub max_ts: Timestamp,
}

impl BlockEntry {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.size.to_le_bytes())?;
        writer.write_all(&self.point_count.to_le_bytes())?;
        writer.write_all(&self.min_ts.to_le_bytes())?;
        writer.write_all(&self.max_ts.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            offset: read_u64(reader)?,
            size: read_u32(reader)?,
            point_count: read_u32(reader)?,
            min_ts: read_i64(reader)?,
            max_ts: read_i64(reader)?,
        })
    }
}

/// Bloom filter over series keys.
///
/// `h_i(key) = xxhash64(key, seed=i) % size_bits` for `i < hash_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    hash_count: u8,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at about 10 bits per item.
    pub fn new(expected_items: usize) -> Self {
        let num_bits = (expected_items * 10).max(64);
        Self {
            bits: vec![0u64; num_bits.div_ceil(64)],
            hash_count: BLOOM_FILTER_DEFAULT_HASH_COUNT,
        }
    }

    fn bit_positions<'a>(&'a self, key: &'a str) -> impl Iterator<Item = (usize, u64)> + 'a {
        let num_bits = (self.bits.len() * 64) as u64;
        (0..self.hash_count).map(move |seed| {
            let bit_idx = xxhash_rust::xxh64::xxh64(key.as_bytes(), u64::from(seed)) % num_bits;
            ((bit_idx / 64) as usize, 1u64 << (bit_idx % 64))
        })
    }

    /// Adds a key.
    pub fn insert(&mut self, key: &str) {
        let positions: Vec<_> = self.bit_positions(key).collect();
        for (word, mask) in positions {
            self.bits[word] |= mask;
        }
    }

    /// Returns false if `key` is definitely absent.
    pub fn maybe_contains(&self, key: &str) -> bool {
        if self.bits.is_empty() {
            return false;
        }
        self.bit_positions(key)
            .all(|(word, mask)| self.bits[word] & mask != 0)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.bits.len() as u32).to_le_bytes())?;
        writer.write_all(&[self.hash_count, 0, 0, 0])?;
        for word in &self.bits {
            writer.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let num_words = read_u32(reader)? as usize;
        let mut flags = [0u8; 4];
        reader.read_exact(&mut flags)?;
        let mut bits = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            bits.push(read_u64(reader)?);
        }
        Ok(Self {
            bits,
            hash_count: flags[0],
        })
    }
}

/// Key index: every block of every key, keys sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIndex {
    entries: BTreeMap<String, Vec<BlockEntry>>,
}

impl KeyIndex {
    /// Records a block under `key`, after any earlier blocks of the key.
    pub fn insert(&mut self, key: &str, entry: BlockEntry) {
        self.entries.entry(key.to_string()).or_default().push(entry);
    }

    /// Returns the blocks of `key` in write order.
    pub fn get(&self, key: &str) -> Option<&[BlockEntry]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Iterates keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates every (key, block) pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BlockEntry)> {
        self.entries
            .iter()
            .flat_map(|(key, blocks)| blocks.iter().map(move |b| (key.as_str(), b)))
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        let mut bloom = BloomFilter::new(self.entries.len());
        for (key, blocks) in &self.entries {
            write_key(writer, key)?;
            writer.write_all(&(blocks.len() as u32).to_le_bytes())?;
            for block in blocks {
                block.write_to(writer)?;
            }
            bloom.insert(key);
        }
        bloom.write_to(writer)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<(Self, BloomFilter)> {
        let key_count = read_u32(reader)? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..key_count {
            let key = read_key(reader)?;
            let block_count = read_u32(reader)? as usize;
            let mut blocks = Vec::with_capacity(block_count);
            for _ in 0..block_count {
                blocks.push(BlockEntry::read_from(reader)?);
            }
            entries.insert(key, blocks);
        }
        let bloom = BloomFilter::read_from(reader)?;
        Ok((Self { entries }, bloom))
    }
}

/// One data block.
///
/// ## Binary Layout
///
/// ```text
/// Size    Field
/// ----    -----
/// 2       key_len (u16)
/// K       key
/// 4       point_count (u32)
/// 8       min_timestamp (i64)
/// 8       max_timestamp (i64)
/// 4       ts_data_size (u32)
/// N       ts_data
/// 4       val_data_size (u32)
/// M       val_data
/// 4       block_crc32 (u32), over every preceding block byte
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsmDataBlock {
    /// Series key.
    pub key: String,
    /// Number of points.
    pub point_count: u32,
    /// Minimum timestamp.
    pub min_ts: Timestamp,
    /// Maximum timestamp.
    pub max_ts: Timestamp,
    /// Encoded timestamps.
    pub ts_data: Vec<u8>,
    /// Encoded values.
    pub val_data: Vec<u8>,
}

impl TsmDataBlock {
    /// Encodes `values` in the given order.
    pub fn encode(key: &str, values: &[(Timestamp, f64)]) -> Self {
        let min_ts = values.iter().map(|(ts, _)| *ts).min().unwrap_or(0);
        let max_ts = values.iter().map(|(ts, _)| *ts).max().unwrap_or(0);
        let encoded = codec::encode(values);
        Self {
            key: key.to_string(),
            point_count: encoded.count,
            min_ts,
            max_ts,
            ts_data: encoded.timestamps,
            val_data: encoded.values,
        }
    }

    /// Decodes the block's points.
    pub fn decode(&self) -> Result<Vec<(Timestamp, f64)>> {
        codec::decode(&self.ts_data, &self.val_data, self.point_count)
    }

    /// Serializes the block, CRC included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        write_key(&mut buf, &self.key)?;
        buf.extend_from_slice(&self.point_count.to_le_bytes());
        buf.extend_from_slice(&self.min_ts.to_le_bytes());
        buf.extend_from_slice(&self.max_ts.to_le_bytes());
        buf.extend_from_slice(&(self.ts_data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.ts_data);
        buf.extend_from_slice(&(self.val_data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.val_data);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parses a serialized block and verifies its CRC.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::ChecksumMismatch`] if verification fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(MigrateError::Codec("block shorter than its checksum".into()));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(MigrateError::ChecksumMismatch { expected, actual });
        }

        let mut reader = body;
        let key = read_key(&mut reader)?;
        let point_count = read_u32(&mut reader)?;
        let min_ts = read_i64(&mut reader)?;
        let max_ts = read_i64(&mut reader)?;
        let ts_len = read_u32(&mut reader)? as usize;
        let mut ts_data = vec![0u8; ts_len];
        reader.read_exact(&mut ts_data)?;
        let val_len = read_u32(&mut reader)? as usize;
        let mut val_data = vec![0u8; val_len];
        reader.read_exact(&mut val_data)?;

        Ok(Self {
            key,
            point_count,
            min_ts,
            max_ts,
            ts_data,
            val_data,
        })
    }

    /// Size of the block when serialized.
    pub fn serialized_size(&self) -> usize {
        2 + self.key.len() + // key
        4 + // point_count
        8 + // min_ts
        8 + // max_ts
        4 + self.ts_data.len() +
        4 + self.val_data.len() +
        4 // block_crc32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Writing,
    Indexed,
}

/// Writes one block file.
///
/// Call sequence: [`TsmWriter::create`], any number of [`TsmWriter::write`],
/// [`TsmWriter::write_index`], [`TsmWriter::close`]. A file closed without
/// `write_index` has no index or footer and is not readable.
pub struct TsmWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    position: u64,
    index: KeyIndex,
    min_timestamp: Timestamp,
    max_timestamp: Timestamp,
    total_point_count: u64,
    state: WriterState,
}

impl TsmWriter {
    /// Creates (or truncates) the file at `path` and writes a placeholder header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        TsmHeader::default().write_to(&mut writer)?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            position: HEADER_SIZE as u64,
            index: KeyIndex::default(),
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            total_point_count: 0,
            state: WriterState::Writing,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one block for `key`. Empty `values` write nothing.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::WriterState`] after `write_index`.
    pub fn write(&mut self, key: &str, values: &[(Timestamp, f64)]) -> Result<()> {
        if self.state != WriterState::Writing {
            return Err(MigrateError::WriterState("write after index"));
        }
        if values.is_empty() {
            return Ok(());
        }

        let block = TsmDataBlock::encode(key, values);
        let bytes = block.to_bytes()?;
        self.writer.write_all(&bytes)?;

        self.index.insert(
            key,
            BlockEntry {
                offset: self.position,
                size: bytes.len() as u32,
                point_count: block.point_count,
                min_ts: block.min_ts,
                max_ts: block.max_ts,
            },
        );
        self.position += bytes.len() as u64;
        self.min_timestamp = self.min_timestamp.min(block.min_ts);
        self.max_timestamp = self.max_timestamp.max(block.max_ts);
        self.total_point_count += u64::from(block.point_count);
        Ok(())
    }

    /// Writes the key index, final header and footer.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::WriterState`] if called twice.
    pub fn write_index(&mut self) -> Result<()> {
        if self.state != WriterState::Writing {
            return Err(MigrateError::WriterState("index written twice"));
        }

        let data_offset = HEADER_SIZE as u64;
        let data_size = self.position - data_offset;

        let index_offset = self.position;
        let mut index_buf = Vec::new();
        self.index.write_to(&mut index_buf)?;
        self.writer.write_all(&index_buf)?;
        self.position += index_buf.len() as u64;

        let header = TsmHeader {
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
            key_count: self.index.len() as u32,
            ..TsmHeader::default()
        };
        self.writer.seek(SeekFrom::Start(0))?;
        header.write_to(&mut self.writer)?;
        self.writer.flush()?;
        self.writer.seek(SeekFrom::End(0))?;

        let footer = TsmFooter {
            index_offset,
            index_size: index_buf.len() as u32,
            data_offset,
            data_size,
            total_point_count: self.total_point_count,
            file_crc32: crc_of_prefix(&self.path, self.position)?,
        };
        footer.write_to(&mut self.writer)?;
        self.position += FOOTER_SIZE as u64;
        self.state = WriterState::Indexed;

        debug!(
            path = %self.path.display(),
            keys = self.index.len(),
            points = self.total_point_count,
            "Wrote block file index"
        );
        Ok(())
    }

    /// Flushes, syncs and closes the file, returning its size in bytes.
    pub fn close(mut self) -> Result<u64> {
        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| io::Error::other(e.to_string()))?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }
}

/// Opens a finalized block file and verifies it.
#[derive(Debug)]
pub struct TsmReader {
    path: PathBuf,
    header: TsmHeader,
    footer: TsmFooter,
    index: KeyIndex,
    bloom: BloomFilter,
}

impl TsmReader {
    /// Opens a file, validating header, footer and file CRC, and loads the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the magic bytes or version
    /// are wrong, or the file CRC does not match.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(MigrateError::Codec(format!(
                "{} is too short for a block file: {} bytes",
                path.display(),
                file_size
            )));
        }
        let mut reader = BufReader::new(file);

        let header = TsmHeader::read_from(&mut reader)?;
        reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let footer = TsmFooter::read_from(&mut reader)?;

        let actual = crc_of_prefix(path, file_size - FOOTER_SIZE as u64)?;
        if actual != footer.file_crc32 {
            return Err(MigrateError::ChecksumMismatch {
                expected: footer.file_crc32,
                actual,
            });
        }

        reader.seek(SeekFrom::Start(footer.index_offset))?;
        let (index, bloom) = KeyIndex::read_from(&mut reader)?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            footer,
            index,
            bloom,
        })
    }

    /// Returns the header.
    pub fn header(&self) -> &TsmHeader {
        &self.header
    }

    /// Returns the footer.
    pub fn footer(&self) -> &TsmFooter {
        &self.footer
    }

    /// Returns the key index.
    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    /// Returns true if the file holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.bloom.maybe_contains(key) && self.index.get(key).is_some()
    }

    fn read_block(&self, reader: &mut BufReader<File>, key: &str, entry: &BlockEntry) -> Result<TsmDataBlock> {
        reader.seek(SeekFrom::Start(entry.offset))?;
        let mut bytes = vec![0u8; entry.size as usize];
        reader.read_exact(&mut bytes)?;
        let block = TsmDataBlock::from_bytes(&bytes)?;
        if block.key != key {
            return Err(MigrateError::Codec(format!(
                "block at {} belongs to '{}', index says '{}'",
                entry.offset, block.key, key
            )));
        }
        Ok(block)
    }

    /// Returns the points of every block of `key`, one vector per block in
    /// write order. A missing key yields no blocks.
    pub fn read_blocks(&self, key: &str) -> Result<Vec<Vec<(Timestamp, f64)>>> {
        let Some(entries) = self.index.get(key) else {
            return Ok(Vec::new());
        };
        let mut reader = BufReader::new(File::open(&self.path)?);
        entries
            .iter()
            .map(|entry| self.read_block(&mut reader, key, entry)?.decode())
            .collect()
    }

    /// Returns every point of `key`, blocks concatenated in write order.
    pub fn read_key(&self, key: &str) -> Result<Vec<(Timestamp, f64)>> {
        Ok(self.read_blocks(key)?.into_iter().flatten().collect())
    }

    /// Reads and decodes every block, returning the total point count.
    ///
    /// # Errors
    ///
    /// Returns an error if a block fails its CRC, fails to decode, or the
    /// total disagrees with the footer.
    pub fn verify(&self) -> Result<u64> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut total = 0u64;
        for (key, entry) in self.index.iter() {
            let points = self.read_block(&mut reader, key, entry)?.decode()?;
            total += points.len() as u64;
        }
        if total != self.footer.total_point_count {
            return Err(MigrateError::Codec(format!(
                "decoded {} points, footer records {}",
                total, self.footer.total_point_count
            )));
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn points(start: i64, n: i64, step: i64) -> Vec<(Timestamp, f64)> {
        (0..n).map(|i| (start + i * step, 50.0 + i as f64 * 0.1)).collect()
    }

    fn write_file(path: &Path, blocks: &[(&str, Vec<(Timestamp, f64)>)]) -> u64 {
        let mut writer = TsmWriter::create(path).unwrap();
        for (key, values) in blocks {
            writer.write(key, values).unwrap();
        }
        writer.write_index().unwrap();
        writer.close().unwrap()
    }

    #[test]
    fn test_header_size() {
        let mut buf = Vec::new();
        TsmHeader::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = TsmHeader {
            min_timestamp: 100,
            max_timestamp: 200,
            key_count: 3,
            ..TsmHeader::default()
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(TsmHeader::read_from(&mut buf.as_slice()).unwrap(), header);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            TsmHeader::read_from(&mut buf.as_slice()),
            Err(MigrateError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_footer_size() {
        let mut buf = Vec::new();
        TsmFooter::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), FOOTER_SIZE);
    }

    #[test]
    fn test_bloom_filter() {
        let mut bloom = BloomFilter::new(100);
        for i in 0..100 {
            bloom.insert(&format!("load,host=h{}#!~#value", i));
        }
        for i in 0..100 {
            assert!(bloom.maybe_contains(&format!("load,host=h{}#!~#value", i)));
        }
        let false_positives = (1000..2000)
            .filter(|i| bloom.maybe_contains(&format!("load,host=h{}#!~#value", i)))
            .count();
        assert!(false_positives < 100, "false positive rate too high: {}", false_positives);
    }

    #[test]
    fn test_data_block_crc() {
        let block = TsmDataBlock::encode("cpu#!~#value", &points(0, 10, 1000));
        let mut bytes = block.to_bytes().unwrap();
        assert_eq!(bytes.len(), block.serialized_size());
        assert_eq!(TsmDataBlock::from_bytes(&bytes).unwrap(), block);

        bytes[5] ^= 0xFF;
        assert!(matches!(
            TsmDataBlock::from_bytes(&bytes),
            Err(MigrateError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_writer_reader_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("000000001-000000002.tsm");
        let data = points(1_577_836_800_000_000_000, 100, 60_000_000_000);

        let size = write_file(&path, &[("load,host=host1#!~#value", data.clone())]);
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());

        let reader = TsmReader::open(&path).unwrap();
        assert_eq!(reader.header().key_count, 1);
        assert_eq!(reader.footer().total_point_count, 100);
        assert_eq!(reader.header().min_timestamp, data[0].0);
        assert_eq!(reader.header().max_timestamp, data[99].0);
        assert_eq!(reader.read_key("load,host=host1#!~#value").unwrap(), data);
        assert!(reader.contains("load,host=host1#!~#value"));
        assert!(!reader.contains("load,host=host2#!~#value"));
        assert!(reader.read_key("missing#!~#value").unwrap().is_empty());
        assert_eq!(reader.verify().unwrap(), 100);
    }

    #[test]
    fn test_repeated_key_keeps_every_block() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dup.tsm");
        let first = points(300, 3, 100);
        let second = points(100, 2, 100);

        write_file(&path, &[("m#!~#value", first.clone()), ("m#!~#value", second.clone())]);

        let reader = TsmReader::open(&path).unwrap();
        assert_eq!(reader.header().key_count, 1);
        let blocks = reader.read_blocks("m#!~#value").unwrap();
        assert_eq!(blocks, vec![first, second]);
        assert_eq!(reader.verify().unwrap(), 5);
    }

    #[test]
    fn test_index_sorted_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sorted.tsm");
        write_file(
            &path,
            &[("zeta#!~#value", points(0, 1, 1)), ("alpha#!~#value", points(0, 1, 1))],
        );
        let reader = TsmReader::open(&path).unwrap();
        let keys: Vec<_> = reader.index().keys().collect();
        assert_eq!(keys, vec!["alpha#!~#value", "zeta#!~#value"]);
    }

    #[test]
    fn test_empty_values_write_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.tsm");
        write_file(&path, &[("m#!~#value", Vec::new()), ("n#!~#value", points(0, 2, 1))]);
        let reader = TsmReader::open(&path).unwrap();
        assert_eq!(reader.header().key_count, 1);
        assert!(!reader.contains("m#!~#value"));
    }

    #[test]
    fn test_write_after_index_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = TsmWriter::create(&temp_dir.path().join("x.tsm")).unwrap();
        writer.write("m#!~#value", &points(0, 1, 1)).unwrap();
        writer.write_index().unwrap();
        assert!(matches!(
            writer.write("m#!~#value", &points(0, 1, 1)),
            Err(MigrateError::WriterState(_))
        ));
        assert!(writer.write_index().is_err());
    }

    #[test]
    fn test_corrupted_file_detected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.tsm");
        write_file(&path, &[("m#!~#value", points(0, 10, 1000))]);

        let mut contents = std::fs::read(&path).unwrap();
        contents[HEADER_SIZE + 10] ^= 0xFF;
        std::fs::write(&path, &contents).unwrap();

        assert!(matches!(
            TsmReader::open(&path),
            Err(MigrateError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_file_without_index_is_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("noindex.tsm");
        let writer = TsmWriter::create(&path).unwrap();
        writer.close().unwrap();
        assert!(TsmReader::open(&path).is_err());
    }
}
