use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Open a file for read/write without truncation, creating it if missing.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn open_rw_no_trunc(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)
}

/// Positional read of exactly `len` bytes starting at `offset`. A short
/// read past end-of-file is zero-padded rather than treated as an error,
/// matching the single-file/cached paged-file backends' sparse-file
/// convention (spec.md §4.2).
///
/// # Errors
/// Returns an error if the seek or read itself fails (not on EOF).
pub fn read_zero_padded(file: &mut File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    let mut read_so_far = 0usize;
    loop {
        match file.read(&mut buf[read_so_far..]) {
            Ok(0) => break,
            Ok(n) => read_so_far += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

/// Positional write of `bytes` at `offset`, zero-padding out to
/// `total_len` so the written region is bit-exact on disk (spec.md §9
/// open question on padding: "Recommend: write zeros").
///
/// # Errors
/// Returns an error if the seek or write fails.
pub fn write_zero_padded(file: &mut File, offset: u64, bytes: &[u8], total_len: usize) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    if bytes.len() < total_len {
        let pad = vec![0u8; total_len - bytes.len()];
        file.write_all(&pad)?;
    }
    Ok(())
}
