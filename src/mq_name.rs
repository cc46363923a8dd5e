// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Queue name validation and the mapping from a queue name to its backing
// file and (on Windows) its kernel object names.

use std::path::{Path, PathBuf};

use crate::error::{MqError, Result};

/// Maximum length of a queue name, leading '/' excluded.
pub const NAME_MAX: usize = 255;

/// Environment variable that overrides the backing-store directory.
pub const DIR_ENV: &str = "LIBMQ_DIR";

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Check that `name` has the portable `/name` form.
pub fn validate(name: &str) -> Result<()> {
    let body = match name.strip_prefix('/') {
        Some(b) => b,
        None => return Err(MqError::InvalidName(name.to_string())),
    };
    if body.is_empty() || body.len() > NAME_MAX || body.contains('/') || body.contains('\0') {
        return Err(MqError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Directory holding backing stores when none is given explicitly.
///
/// `LIBMQ_DIR` wins, then `/dev/shm/mqueue` where `/dev/shm` exists,
/// then `mqueue` under the system temp directory.
pub fn default_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DIR_ENV) {
        return PathBuf::from(dir);
    }
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        return shm.join("mqueue");
    }
    std::env::temp_dir().join("mqueue")
}

/// Backing file for an already validated queue name.
pub fn store_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name.trim_start_matches('/'))
}

/// Name for a kernel object tied to the backing file at `path`.
///
/// The hash keeps names short and free of path separators, which Win32
/// object names do not allow.
pub fn kernel_object_name(path: &Path, suffix: &str) -> String {
    let hash = fnv1a_64(path.to_string_lossy().as_bytes());
    format!("libmq_{hash:016x}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
    }

    #[test]
    fn validate_accepts_simple_names() {
        assert!(validate("/queue").is_ok());
        assert!(validate("/a.b-c_d").is_ok());
    }

    #[test]
    fn validate_rejects_malformed_names() {
        for bad in ["", "/", "queue", "/a/b", "//x"] {
            assert!(
                matches!(validate(bad), Err(MqError::InvalidName(_))),
                "{bad:?} accepted"
            );
        }
        let long = format!("/{}", "x".repeat(NAME_MAX + 1));
        assert!(validate(&long).is_err());
    }

    #[test]
    fn store_path_strips_slash() {
        let p = store_path(Path::new("/tmp/mq"), "/orders");
        assert_eq!(p, PathBuf::from("/tmp/mq/orders"));
    }

    #[test]
    fn kernel_object_name_is_stable() {
        let a = kernel_object_name(Path::new("/tmp/mq/orders"), "lock");
        let b = kernel_object_name(Path::new("/tmp/mq/orders"), "lock");
        let c = kernel_object_name(Path::new("/tmp/mq/orders"), "send");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.contains('/'));
    }
}
