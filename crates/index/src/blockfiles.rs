//! Append-only block-file discovery and framing.
//!
//! The upstream node writes `blk*.dat` files as `magic(4) ++ size(4 LE) ++
//! payload`, zero-padded between frames. Bulk sync memory-maps whole files;
//! the tail follow path streams with a buffered reader because the last
//! file grows mid-read.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;

use memmap2::Mmap;
use stashd_params::Hash256;
use stashd_primitives::block::HEADER_SIZE;
use stashd_primitives::hash::sha256d;

/// A file is abandoned after this many unparseable frames.
pub const MAX_FRAME_FAILURES: u32 = 4;

pub fn block_file_name(ordinal: u32) -> String {
    format!("blk{ordinal:05}.dat")
}

#[derive(Debug)]
pub enum FileReaderError {
    Io(std::io::Error),
    WrongNetwork { path: PathBuf, found: [u8; 4] },
}

impl std::fmt::Display for FileReaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileReaderError::Io(err) => write!(f, "{err}"),
            FileReaderError::WrongNetwork { path, found } => write!(
                f,
                "{} has magic {:02x}{:02x}{:02x}{:02x}, wrong network",
                path.display(),
                found[0],
                found[1],
                found[2],
                found[3]
            ),
        }
    }
}

impl std::error::Error for FileReaderError {}

impl From<std::io::Error> for FileReaderError {
    fn from(err: std::io::Error) -> Self {
        FileReaderError::Io(err)
    }
}

#[derive(Clone, Debug)]
pub struct BlockFileInfo {
    pub ordinal: u32,
    pub path: PathBuf,
    pub size: u64,
    /// Sum of the sizes of all earlier files, for progress accounting.
    pub cumulative_offset: u64,
}

pub struct BlockFileSet {
    dir: PathBuf,
    magic: [u8; 4],
    files: Vec<BlockFileInfo>,
}

impl BlockFileSet {
    /// Enumerates `blk00000.dat`, `blk00001.dat`, ... until the first
    /// missing ordinal.
    pub fn discover(dir: impl Into<PathBuf>, magic: [u8; 4]) -> Result<Self, FileReaderError> {
        let mut set = Self {
            dir: dir.into(),
            magic,
            files: Vec::new(),
        };
        set.refresh()?;
        Ok(set)
    }

    /// Re-stats the newest file and picks up files that appeared since
    /// discovery. Returns true when anything changed.
    pub fn refresh(&mut self) -> Result<bool, FileReaderError> {
        let mut changed = false;
        if let Some(last) = self.files.last_mut() {
            let size = std::fs::metadata(&last.path)?.len();
            if size != last.size {
                last.size = size;
                changed = true;
            }
        }
        let mut next = self.files.len() as u32;
        loop {
            let path = self.dir.join(block_file_name(next));
            let Ok(metadata) = std::fs::metadata(&path) else {
                break;
            };
            let cumulative_offset = self
                .files
                .last()
                .map(|info| info.cumulative_offset + info.size)
                .unwrap_or(0);
            self.files.push(BlockFileInfo {
                ordinal: next,
                path,
                size: metadata.len(),
                cumulative_offset,
            });
            changed = true;
            next += 1;
        }
        Ok(changed)
    }

    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    pub fn files(&self) -> &[BlockFileInfo] {
        &self.files
    }

    pub fn file(&self, ordinal: u32) -> Option<&BlockFileInfo> {
        self.files.get(ordinal as usize)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|info| info.size).sum()
    }

    /// Hash of the first framed header in each file, used to find where
    /// header sync left off. `None` for files too short to hold a frame.
    /// A magic mismatch on the first frame is a wrong-network error.
    pub fn first_hashes(&self) -> Result<Vec<Option<Hash256>>, FileReaderError> {
        let mut hashes = Vec::with_capacity(self.files.len());
        for info in &self.files {
            if info.size < (8 + HEADER_SIZE) as u64 {
                hashes.push(None);
                continue;
            }
            let mut file = File::open(&info.path)?;
            let mut prologue = [0u8; 8];
            file.read_exact(&mut prologue)?;
            if prologue[..4] != self.magic {
                let mut found = [0u8; 4];
                found.copy_from_slice(&prologue[..4]);
                return Err(FileReaderError::WrongNetwork {
                    path: info.path.clone(),
                    found,
                });
            }
            let mut raw_header = [0u8; HEADER_SIZE];
            file.read_exact(&mut raw_header)?;
            hashes.push(Some(sha256d(&raw_header)));
        }
        Ok(hashes)
    }
}

/// One frame as laid out on disk. `offset` points at the magic bytes.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'d> {
    pub offset: u64,
    pub payload: &'d [u8],
}

pub struct MappedBlockFile {
    pub ordinal: u32,
    mmap: Mmap,
}

impl MappedBlockFile {
    pub fn open(info: &BlockFileInfo) -> Result<Self, FileReaderError> {
        let file = File::open(&info.path)?;
        // Safety: the node only ever appends; the mapped prefix is stable.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            ordinal: info.ordinal,
            mmap,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    pub fn cursor(&self, magic: [u8; 4], offset: u64) -> FrameCursor<'_> {
        FrameCursor::new(&self.mmap, magic, offset as usize)
    }
}

/// Walks frames within one mapped file. After a payload fails to parse
/// downstream, `resync` hunts byte-by-byte for the next magic sequence;
/// four failures abandon the file.
pub struct FrameCursor<'d> {
    data: &'d [u8],
    magic: [u8; 4],
    pos: usize,
    failures: u32,
}

impl<'d> FrameCursor<'d> {
    pub fn new(data: &'d [u8], magic: [u8; 4], pos: usize) -> Self {
        Self {
            data,
            magic,
            pos,
            failures: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// True once the cursor sits on zero padding or too few bytes for a
    /// frame, which is the normal end of a file's data.
    pub fn at_padding(&self) -> bool {
        if self.pos + 8 > self.data.len() {
            return true;
        }
        self.data[self.pos..self.pos + 4] == [0u8; 4]
    }

    pub fn next_frame(&mut self) -> Option<Frame<'d>> {
        if self.pos + 8 > self.data.len() {
            return None;
        }
        if self.data[self.pos..self.pos + 4] != self.magic {
            return None;
        }
        let size = u32::from_le_bytes(
            self.data[self.pos + 4..self.pos + 8]
                .try_into()
                .expect("size slice"),
        ) as usize;
        if size == 0 || self.pos + 8 + size > self.data.len() {
            return None;
        }
        let frame = Frame {
            offset: self.pos as u64,
            payload: &self.data[self.pos + 8..self.pos + 8 + size],
        };
        self.pos += 8 + size;
        Some(frame)
    }

    /// Scans forward for the next magic sequence after a bad frame.
    /// Returns false once the file should be abandoned.
    pub fn resync(&mut self) -> bool {
        self.failures += 1;
        if self.failures >= MAX_FRAME_FAILURES {
            return false;
        }
        let mut probe = self.pos + 1;
        while probe + 4 <= self.data.len() {
            if self.data[probe..probe + 4] == self.magic {
                self.pos = probe;
                return true;
            }
            probe += 1;
        }
        self.pos = self.data.len();
        false
    }
}

/// Read position across the file set: next byte to examine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FileCursor {
    pub file_num: u32,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct OwnedFrame {
    pub file_num: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Streams complete frames past `cursor`, following into a newly split
/// file. Leaves the cursor on the first byte it could not consume, so a
/// partially flushed frame is retried on the next call.
pub fn read_new_frames(
    set: &BlockFileSet,
    cursor: &mut FileCursor,
) -> Result<Vec<OwnedFrame>, FileReaderError> {
    let magic = set.magic();
    let mut frames = Vec::new();
    loop {
        let Some(info) = set.file(cursor.file_num) else {
            break;
        };
        let file = match File::open(&info.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) => return Err(err.into()),
        };
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(cursor.offset))?;
        let mut file_done = true;
        loop {
            let mut prologue = [0u8; 8];
            if !read_exact_or_eof(&mut reader, &mut prologue)? {
                break;
            }
            if prologue[..4] != magic {
                // Padding, or data not yet flushed by the node.
                break;
            }
            let size = u32::from_le_bytes([prologue[4], prologue[5], prologue[6], prologue[7]]);
            let mut payload = vec![0u8; size as usize];
            if !read_exact_or_eof(&mut reader, &mut payload)? {
                // Frame header landed before its body; retry later.
                file_done = false;
                break;
            }
            frames.push(OwnedFrame {
                file_num: cursor.file_num,
                offset: cursor.offset,
                payload,
            });
            cursor.offset += 8 + size as u64;
        }
        let next_exists = set.file(cursor.file_num + 1).is_some()
            || std::fs::metadata(set_path(set, cursor.file_num + 1)).is_ok();
        if file_done && next_exists {
            cursor.file_num += 1;
            cursor.offset = 0;
            continue;
        }
        break;
    }
    Ok(frames)
}

fn set_path(set: &BlockFileSet, ordinal: u32) -> PathBuf {
    set.dir.join(block_file_name(ordinal))
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, FileReaderError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

    fn write_frame(out: &mut Vec<u8>, payload: &[u8]) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }

    fn write_file(dir: &Path, ordinal: u32, bytes: &[u8]) {
        let mut file = File::create(dir.join(block_file_name(ordinal))).expect("create");
        file.write_all(bytes).expect("write");
    }

    #[test]
    fn discovery_stops_at_first_gap() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), 0, b"aaaa");
        write_file(dir.path(), 1, b"bbbbbb");
        write_file(dir.path(), 3, b"cc");
        let set = BlockFileSet::discover(dir.path(), MAGIC).expect("discover");
        assert_eq!(set.files().len(), 2);
        assert_eq!(set.files()[1].cumulative_offset, 4);
        assert_eq!(set.total_bytes(), 10);
    }

    #[test]
    fn frame_cursor_walks_frames_and_stops_at_padding() {
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &[1, 2, 3]);
        write_frame(&mut bytes, &[4; 10]);
        bytes.extend_from_slice(&[0u8; 16]);

        let mut cursor = FrameCursor::new(&bytes, MAGIC, 0);
        let first = cursor.next_frame().expect("first");
        assert_eq!(first.offset, 0);
        assert_eq!(first.payload, &[1, 2, 3]);
        let second = cursor.next_frame().expect("second");
        assert_eq!(second.payload, &[4; 10]);
        assert!(cursor.next_frame().is_none());
    }

    #[test]
    fn resync_finds_next_magic_and_gives_up_after_four() {
        let mut bytes = vec![0x00; 7];
        write_frame(&mut bytes, &[9, 9]);

        let mut cursor = FrameCursor::new(&bytes, MAGIC, 0);
        assert!(cursor.next_frame().is_none());
        assert!(cursor.resync());
        let frame = cursor.next_frame().expect("frame after resync");
        assert_eq!(frame.payload, &[9, 9]);

        // No magic anywhere: a single failed resync exhausts the file.
        let garbage = vec![0x55u8; 64];
        let mut cursor = FrameCursor::new(&garbage, MAGIC, 0);
        assert!(!cursor.resync());

        // Magic keeps appearing but parsing keeps failing: the fourth
        // failure abandons the file.
        let mut tricky = Vec::new();
        for _ in 0..5 {
            tricky.push(0x00);
            tricky.extend_from_slice(&MAGIC);
        }
        let mut cursor = FrameCursor::new(&tricky, MAGIC, 0);
        assert!(cursor.resync());
        assert!(cursor.resync());
        assert!(cursor.resync());
        assert!(!cursor.resync());
    }

    #[test]
    fn tail_reader_resumes_and_follows_split() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut first = Vec::new();
        write_frame(&mut first, &[1; 4]);
        write_frame(&mut first, &[2; 4]);
        write_file(dir.path(), 0, &first);

        let mut set = BlockFileSet::discover(dir.path(), MAGIC).expect("discover");
        let mut cursor = FileCursor::default();
        let frames = read_new_frames(&set, &mut cursor).expect("read");
        assert_eq!(frames.len(), 2);
        assert_eq!(cursor, FileCursor {
            file_num: 0,
            offset: first.len() as u64,
        });

        // Nothing new yet.
        let frames = read_new_frames(&set, &mut cursor).expect("read");
        assert!(frames.is_empty());

        // File split: next ordinal appears with one more frame.
        let mut second = Vec::new();
        write_frame(&mut second, &[3; 8]);
        write_file(dir.path(), 1, &second);
        set.refresh().expect("refresh");
        let frames = read_new_frames(&set, &mut cursor).expect("read");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].file_num, 1);
        assert_eq!(frames[0].payload, vec![3; 8]);
    }

    #[test]
    fn tail_reader_waits_for_partial_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &[7; 32]);
        // Truncate mid-payload to mimic an in-flight append.
        let full_len = bytes.len();
        bytes.truncate(full_len - 10);
        write_file(dir.path(), 0, &bytes);

        let set = BlockFileSet::discover(dir.path(), MAGIC).expect("discover");
        let mut cursor = FileCursor::default();
        let frames = read_new_frames(&set, &mut cursor).expect("read");
        assert!(frames.is_empty());
        assert_eq!(cursor.offset, 0);
    }

    #[test]
    fn first_hashes_flags_wrong_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        bytes.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        bytes.extend_from_slice(&[0u8; HEADER_SIZE]);
        write_file(dir.path(), 0, &bytes);

        let set = BlockFileSet::discover(dir.path(), MAGIC).expect("discover");
        assert!(matches!(
            set.first_hashes(),
            Err(FileReaderError::WrongNetwork { .. })
        ));
    }
}
