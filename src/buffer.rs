//! Byte accumulator that escalates its storage medium as it grows
//!
//! The buffer starts as a plain vector of bytes. Once it holds more than
//! `STRBUF_LIMIT` bytes it moves into a random-access in-memory store, and
//! when it grows over the configured overflow threshold its contents are
//! copied into an anonymous temporary file. Escalation is one-way: a buffer
//! never moves back to a cheaper tier during its lifetime.
use std::cmp;
use std::env;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use netbuf::Buf;


/// Size at which plain bytes are promoted to the random-access store
pub const STRBUF_LIMIT: usize = 8192;
/// Content is copied between tiers in pieces of this size
pub const COPY_BYTES: usize = 1 << 18;

static TEMPFILE_COUNTER: AtomicUsize = AtomicUsize::new(0);


/// Storage tier currently backing an `OverflowBuffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    RandomAccess,
    Disk,
}

enum Storage {
    Memory(Vec<u8>),
    RandomAccess(Buf),
    Disk(DiskFile),
}

struct DiskFile {
    file: File,
    read_pos: u64,
    write_pos: u64,
    path: Option<PathBuf>,
}

/// An append-only byte sequence with a read cursor
///
/// `len()` is always the number of bytes appended minus the number of bytes
/// consumed through `get(.., true)` or `skip()`.
pub struct OverflowBuffer {
    storage: Storage,
    overflow: u64,
}

impl OverflowBuffer {
    /// Create an empty buffer which spills to disk after `overflow` bytes
    pub fn new(overflow: u64) -> OverflowBuffer {
        OverflowBuffer {
            storage: Storage::Memory(Vec::new()),
            overflow: overflow,
        }
    }

    /// Number of bytes not yet consumed
    pub fn len(&self) -> u64 {
        match self.storage {
            Storage::Memory(ref v) => v.len() as u64,
            Storage::RandomAccess(ref b) => b.len() as u64,
            Storage::Disk(ref d) => d.remain(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tier(&self) -> Tier {
        match self.storage {
            Storage::Memory(..) => Tier::Memory,
            Storage::RandomAccess(..) => Tier::RandomAccess,
            Storage::Disk(..) => Tier::Disk,
        }
    }

    /// Append bytes to the end of the buffer
    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let total = self.len().saturating_add(data.len() as u64);
        if let Storage::Memory(ref mut v) = self.storage {
            if total < STRBUF_LIMIT as u64 {
                v.extend_from_slice(data);
                return Ok(());
            }
        }
        if total >= self.overflow {
            self.promote_to_disk()?;
        } else if self.tier() == Tier::Memory {
            self.promote_to_random_access();
        }
        match self.storage {
            Storage::Memory(..) => unreachable!(),
            Storage::RandomAccess(ref mut b) => b.extend(data),
            Storage::Disk(ref mut d) => d.append(data)?,
        }
        Ok(())
    }

    /// Return up to `n` bytes from the read position
    ///
    /// When `skip` is false the read position is left untouched, so calling
    /// this twice in a row returns the same bytes.
    pub fn get(&mut self, n: usize, skip: bool) -> io::Result<Vec<u8>> {
        let n = cmp::min(n as u64, self.len()) as usize;
        let data = match self.storage {
            Storage::Memory(ref mut v) => {
                if skip {
                    v.drain(..n).collect()
                } else {
                    v[..n].to_vec()
                }
            }
            Storage::RandomAccess(ref mut b) => {
                let data = b[..][..n].to_vec();
                if skip {
                    b.consume(n);
                }
                data
            }
            Storage::Disk(ref mut d) => d.get(n, skip)?,
        };
        Ok(data)
    }

    /// Advance the read position by `n` bytes
    ///
    /// With `allow_prune` the storage consumed so far may be released once
    /// the buffer is fully drained.
    pub fn skip(&mut self, n: u64, allow_prune: bool) -> io::Result<()> {
        let remain = self.len();
        if n > remain {
            return Err(io::Error::new(io::ErrorKind::InvalidInput,
                format!("can't skip {} bytes in buffer of {} bytes",
                        n, remain)));
        }
        match self.storage {
            Storage::Memory(ref mut v) => {
                if n as usize == v.len() {
                    v.clear();
                } else {
                    v.drain(..n as usize);
                }
            }
            Storage::RandomAccess(ref mut b) => b.consume(n as usize),
            Storage::Disk(ref mut d) => {
                d.read_pos += n;
                if allow_prune && d.remain() == 0 {
                    d.truncate()?;
                }
            }
        }
        Ok(())
    }

    /// Release any storage already consumed by the reader
    pub fn prune(&mut self) -> io::Result<()> {
        match self.storage {
            Storage::Memory(ref mut v) => v.shrink_to_fit(),
            Storage::RandomAccess(..) => {}
            Storage::Disk(ref mut d) => {
                if d.remain() == 0 {
                    d.truncate()?;
                }
            }
        }
        Ok(())
    }

    /// Drop all content and storage
    pub fn close(&mut self) {
        self.storage = Storage::Memory(Vec::new());
    }

    fn promote_to_random_access(&mut self) {
        let old = match self.storage {
            Storage::Memory(ref mut v) => ::std::mem::replace(v, Vec::new()),
            _ => return,
        };
        let mut buf = Buf::new();
        buf.extend(&old);
        self.storage = Storage::RandomAccess(buf);
    }

    fn promote_to_disk(&mut self) -> io::Result<()> {
        let mut disk = match self.storage {
            Storage::Disk(..) => return Ok(()),
            _ => DiskFile::new()?,
        };
        match self.storage {
            Storage::Memory(ref v) => {
                for chunk in v.chunks(COPY_BYTES) {
                    disk.append(chunk)?;
                }
            }
            Storage::RandomAccess(ref b) => {
                for chunk in b[..].chunks(COPY_BYTES) {
                    disk.append(chunk)?;
                }
            }
            Storage::Disk(..) => unreachable!(),
        }
        trace!("buffer of {} bytes moved to disk", disk.remain());
        self.storage = Storage::Disk(disk);
        Ok(())
    }
}

impl Read for OverflowBuffer {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let data = self.get(out.len(), true)?;
        out[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl fmt::Debug for OverflowBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OverflowBuffer")
            .field("tier", &self.tier())
            .field("len", &self.len())
            .field("overflow", &self.overflow)
            .finish()
    }
}

impl DiskFile {
    fn new() -> io::Result<DiskFile> {
        let dir = env::temp_dir();
        for _ in 0..16 {
            let path = dir.join(format!(".tk-httpd-{}-{}.buf", process::id(),
                TEMPFILE_COUNTER.fetch_add(1, Ordering::Relaxed)));
            let file = match OpenOptions::new()
                .read(true).write(true).create_new(true).open(&path)
            {
                Ok(file) => file,
                Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    continue;
                }
                Err(e) => return Err(e),
            };
            return Ok(DiskFile {
                file: file,
                read_pos: 0,
                write_pos: 0,
                path: unlink_open(path),
            });
        }
        Err(io::Error::new(io::ErrorKind::AlreadyExists,
            "can't create a unique temporary file"))
    }
    fn remain(&self) -> u64 {
        self.write_pos.saturating_sub(self.read_pos)
    }
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.write_pos))?;
        self.file.write_all(data)?;
        self.write_pos = self.write_pos.saturating_add(data.len() as u64);
        Ok(())
    }
    fn get(&mut self, n: usize, skip: bool) -> io::Result<Vec<u8>> {
        let mut data = vec![0u8; n];
        self.file.seek(SeekFrom::Start(self.read_pos))?;
        self.file.read_exact(&mut data)?;
        if skip {
            self.read_pos += n as u64;
        }
        Ok(data)
    }
    fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.read_pos = 0;
        self.write_pos = 0;
        Ok(())
    }
}

impl Drop for DiskFile {
    fn drop(&mut self) {
        if let Some(ref path) = self.path {
            fs::remove_file(path).ok();
        }
    }
}

// Unix lets us remove the name while the file stays open, so nothing is
// left behind even if the process dies
#[cfg(unix)]
fn unlink_open(path: PathBuf) -> Option<PathBuf> {
    match fs::remove_file(&path) {
        Ok(()) => None,
        Err(_) => Some(path),
    }
}

#[cfg(not(unix))]
fn unlink_open(path: PathBuf) -> Option<PathBuf> {
    Some(path)
}
