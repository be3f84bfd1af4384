//! Read-only boot archive handed over by the boot stage, in cpio newc
//! format. This is where the first user executables come from.

use crate::*;
use super::FileSystem;
use crate::file::File;
use alloc::boxed::Box;
use alloc::string::String;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Once;

static INITRD: Once<Initrd> = Once::new();

/// Mounts the boot archive. Later calls keep the first archive.
pub fn init(archive: &'static [u8]) -> &'static Initrd {
    INITRD.call_once(|| Initrd::new(archive))
}

pub fn root() -> Option<&'static Initrd> {
    INITRD.get()
}

pub struct Initrd {
    archive: &'static [u8],
    open_handles: AtomicUsize,
}

impl Initrd {
    pub fn new(archive: &'static [u8]) -> Initrd {
        Initrd {
            archive,
            open_handles: AtomicUsize::new(0),
        }
    }

    /// Number of file handles currently open on this archive.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    fn find(&self, path: &str) -> Option<&'static [u8]> {
        let wanted = path.trim_start_matches('/');
        for entry in cpio_reader::iter_files(self.archive) {
            if entry.name().trim_start_matches('/') == wanted {
                return Some(entry.file());
            }
        }
        None
    }
}

impl FileSystem for Initrd {
    fn volume_label(&self) -> String {
        String::from("initrd")
    }

    fn open_file(&'static self, path: &str) -> Result<File, Error> {
        let data = self.find(path).ok_or(Error::EntryNotFound)?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(File::new(Box::new(InitrdFile {
            fs: self,
            data,
            position: 0,
        })))
    }
}

pub struct InitrdFile {
    fs: &'static Initrd,
    data: &'static [u8],
    position: u64,
}

impl axiom::io::Read for InitrdFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let start = self.position as usize;
        if start >= self.data.len() {
            return Ok(0);
        }
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl axiom::io::Seek for InitrdFile {
    fn seek(&mut self, position: u64) -> Result<(), Error> {
        if position > self.size() {
            return Err(Error::InvalidSeek);
        }
        self.position = position;
        Ok(())
    }

    fn offset(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl Drop for InitrdFile {
    fn drop(&mut self) {
        self.fs.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
