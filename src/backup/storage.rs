use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

const HASH_BUFFER_BYTES: usize = 64 * 1024;

pub(crate) fn sha256_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    hash_file_into(path, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_file_into(path: &Path, hasher: &mut Sha256) -> io::Result<()> {
    let mut file = fs::File::open(path)?;
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..bytes_read]);
    }
}

/// Digest of a directory tree: every entry's relative path in sorted order,
/// followed by the bytes of each regular file.
pub(crate) fn sha256_tree(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        if entry.file_type().is_file() {
            hash_file_into(entry.path(), &mut hasher)?;
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub(crate) fn checksum_path(path: &Path) -> io::Result<String> {
    if fs::symlink_metadata(path)?.is_dir() {
        sha256_tree(path)
    } else {
        sha256_file(path)
    }
}

/// Copy a file or directory tree, keeping permission bits. Returns bytes copied.
pub(crate) fn copy_preserving(src: &Path, dst: &Path) -> io::Result<u64> {
    if fs::symlink_metadata(src)?.is_dir() {
        copy_tree(src, dst)
    } else {
        fs::copy(src, dst)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0u64;
    let mut dirs = Vec::new();
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dirs.push((target, entry.metadata().map_err(io::Error::from)?.permissions()));
        } else if file_type.is_file() {
            copied += fs::copy(entry.path(), &target)?;
        }
    }
    // children first, so read-only directories do not block their own contents
    for (dir, permissions) in dirs.into_iter().rev() {
        fs::set_permissions(dir, permissions)?;
    }
    Ok(copied)
}

pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

pub(crate) fn path_size(path: &Path) -> u64 {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|md| md.len())
            .sum(),
        Ok(metadata) => metadata.len(),
        Err(_) => 0,
    }
}

/// `dir/name`, or `dir/base_N.ext` for the first free N when taken.
pub(crate) fn unique_destination(dir: &Path, name: &OsStr) -> PathBuf {
    let candidate = dir.join(name);
    if fs::symlink_metadata(&candidate).is_err() {
        return candidate;
    }
    let name = name.to_string_lossy();
    let (base, ext) = split_name_ext(&name);
    let mut counter = 1u32;
    loop {
        let file_name = if ext.is_empty() {
            format!("{}_{}", base, counter)
        } else {
            format!("{}_{}.{}", base, counter, ext)
        };
        let candidate = dir.join(file_name);
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        counter += 1;
    }
}

fn split_name_ext(name: &str) -> (String, String) {
    match name.rfind('.') {
        // a leading dot marks a hidden file, not an extension
        Some(idx) if idx > 0 => {
            let (base, ext) = name.split_at(idx);
            (base.to_string(), ext.trim_start_matches('.').to_string())
        }
        _ => (name.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn collisions_get_numeric_suffix_before_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.log"), b"a").unwrap();
        fs::write(dir.path().join("report_1.log"), b"b").unwrap();
        fs::write(dir.path().join(".hidden"), b"c").unwrap();

        assert_eq!(
            unique_destination(dir.path(), OsStr::new("report.log")),
            dir.path().join("report_2.log")
        );
        assert_eq!(
            unique_destination(dir.path(), OsStr::new(".hidden")),
            dir.path().join(".hidden_1")
        );
        assert_eq!(
            unique_destination(dir.path(), OsStr::new("fresh.txt")),
            dir.path().join("fresh.txt")
        );
    }

    #[test]
    fn tree_copy_keeps_checksum() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("inner")).unwrap();
        fs::write(src.join("a.txt"), b"alpha").unwrap();
        fs::write(src.join("inner/b.txt"), b"beta").unwrap();

        let dst = dir.path().join("dst");
        assert_eq!(copy_preserving(&src, &dst).unwrap(), 9);
        assert_eq!(checksum_path(&src).unwrap(), checksum_path(&dst).unwrap());
        assert_eq!(path_size(&dst), 9);

        fs::write(dst.join("inner/b.txt"), b"BETA").unwrap();
        assert_ne!(checksum_path(&src).unwrap(), checksum_path(&dst).unwrap());
    }

    #[test]
    fn file_digest_matches_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
