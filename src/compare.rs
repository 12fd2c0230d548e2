//! Byte-for-byte change detection between a staged download and the
//! installed file.
//!
//! The comparison is biased towards installing: any failure to open or read
//! either side counts as "different", so an ambiguous comparison never
//! blocks an update.

use std::fs::File;
use std::path::Path;

use crate::utils::read_full;

/// Chunk size used when comparing files.
pub const CHUNK_SIZE: usize = 64_000;

/// Whether `a` and `b` have exactly the same content.
pub fn files_equal(a: &Path, b: &Path) -> bool {
    let (mut fa, mut fb) = match (File::open(a), File::open(b)) {
        (Ok(fa), Ok(fb)) => (fa, fb),
        _ => return false,
    };

    // Cheap early exit on differing lengths.
    if let (Ok(ma), Ok(mb)) = (fa.metadata(), fb.metadata()) {
        if ma.len() != mb.len() {
            return false;
        }
    }

    let mut buf_a = vec![0u8; CHUNK_SIZE];
    let mut buf_b = vec![0u8; CHUNK_SIZE];
    loop {
        let (na, nb) = match (read_full(&mut fa, &mut buf_a), read_full(&mut fb, &mut buf_b)) {
            (Ok(na), Ok(nb)) => (na, nb),
            _ => return false,
        };
        if na != nb || buf_a[..na] != buf_b[..nb] {
            return false;
        }
        if na == 0 {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_destination_is_different() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"content").unwrap();
        assert!(!files_equal(&a, &dir.path().join("missing")));
        assert!(!files_equal(&dir.path().join("missing"), &a));
    }

    #[test]
    fn test_both_empty_are_equal() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"").unwrap();
        fs::write(&b, b"").unwrap();
        assert!(files_equal(&a, &b));
    }

    #[test]
    fn test_directory_is_different() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"").unwrap();
        assert!(!files_equal(&a, dir.path()));
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write_pair(dir: &std::path::Path, a: &[u8], b: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
        let pa = dir.join("a");
        let pb = dir.join("b");
        fs::write(&pa, a).unwrap();
        fs::write(&pb, b).unwrap();
        (pa, pb)
    }

    #[test]
    fn test_identical_multi_chunk_files_are_equal() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(2 * CHUNK_SIZE + 7);
        let (a, b) = write_pair(dir.path(), &data, &data);
        assert!(files_equal(&a, &b));
    }

    #[test]
    fn test_exactly_one_chunk_is_equal() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(CHUNK_SIZE);
        let (a, b) = write_pair(dir.path(), &data, &data);
        assert!(files_equal(&a, &b));
    }

    #[test]
    fn test_single_flipped_byte_is_different() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(2 * CHUNK_SIZE + 7);
        for offset in [0, CHUNK_SIZE - 1, CHUNK_SIZE, data.len() - 1] {
            let mut changed = data.clone();
            changed[offset] ^= 0xff;
            let (a, b) = write_pair(dir.path(), &data, &changed);
            assert!(!files_equal(&a, &b), "byte {offset} flipped");
            assert!(!files_equal(&b, &a), "byte {offset} flipped");
        }
    }

    #[test]
    fn test_length_difference_is_different() {
        let dir = tempfile::tempdir().unwrap();
        let long = pattern(CHUNK_SIZE + 1);
        let (a, b) = write_pair(dir.path(), &long[..CHUNK_SIZE], &long);
        assert!(!files_equal(&a, &b));
        assert!(!files_equal(&b, &a));
    }
}
