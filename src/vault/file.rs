// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File-backed credential vault.
//!
//! Each entry is one file under the vault root, named by the SHA-256 of the
//! entry name so arbitrary user ids in fallback keys never escape the
//! directory or overflow file-name limits. A file holds
//! `[u32 BE name length][name][value]`. Each write goes to its own temp file
//! and is renamed into place. On unix the files are created `0600`.
//!
//! The directory is expected to sit on install-scoped, OS-protected storage
//! (app sandbox / keystore-backed mount); this module does not encrypt.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use ring::digest;
use uuid::Uuid;

use super::{validate_entry_name, CredentialVault, VaultError, VaultResult};

const ENTRY_EXTENSION: &str = "secret";

/// Credential vault rooted at a protected directory.
#[derive(Debug, Clone)]
pub struct FileVault {
    root: PathBuf,
}

impl FileVault {
    /// Open the vault, creating its directory if needed.
    ///
    /// Fails with `VaultError::Unavailable` when the directory cannot be
    /// created or is not writable.
    pub fn open(root: impl AsRef<Path>) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| VaultError::Unavailable(format!("{}: {e}", root.display())))?;
        let vault = Self { root };
        vault.health_check()?;
        Ok(vault)
    }

    /// Root directory of the vault.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write-read-delete probe of the vault directory.
    pub fn health_check(&self) -> VaultResult<()> {
        let probe = self.root.join(".health_check");
        let data = b"health_check_data";
        fs::write(&probe, data).map_err(|e| VaultError::Unavailable(e.to_string()))?;
        let read = fs::read(&probe).map_err(|e| VaultError::Unavailable(e.to_string()))?;
        fs::remove_file(&probe)?;
        if read != data {
            return Err(VaultError::Unavailable(
                "health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }

    fn entry_path(&self, entry: &str) -> PathBuf {
        let hash = digest::digest(&digest::SHA256, entry.as_bytes());
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", hex::encode(hash.as_ref())))
    }

    /// Read a whole entry file and split it into `(name, value)`.
    fn read_entry_file(path: &Path) -> VaultResult<Option<(String, Vec<u8>)>> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(split_entry(&data))
    }
}

impl FileVault {
    fn write_entry_file(path: &Path, entry: &str, value: &[u8]) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(&(entry.len() as u32).to_be_bytes())?;
        file.write_all(entry.as_bytes())?;
        file.write_all(value)?;
        file.sync_all()
    }
}

fn split_entry(data: &[u8]) -> Option<(String, Vec<u8>)> {
    let len_bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let name_len = u32::from_be_bytes(len_bytes) as usize;
    let name = data.get(4..4 + name_len)?;
    let name = String::from_utf8(name.to_vec()).ok()?;
    Some((name, data[4 + name_len..].to_vec()))
}

impl CredentialVault for FileVault {
    fn get(&self, entry: &str) -> VaultResult<Option<Vec<u8>>> {
        validate_entry_name(entry)?;
        match Self::read_entry_file(&self.entry_path(entry))? {
            Some((name, value)) if name == entry => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    fn set(&self, entry: &str, value: &[u8]) -> VaultResult<()> {
        validate_entry_name(entry)?;
        let path = self.entry_path(entry);
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let written = Self::write_entry_file(&temp_path, entry, value)
            .and_then(|()| fs::rename(&temp_path, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete(&self, entry: &str) -> VaultResult<bool> {
        validate_entry_name(entry)?;
        match fs::remove_file(self.entry_path(entry)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn entries_with_prefix(&self, prefix: &str) -> VaultResult<Vec<String>> {
        let mut names = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.extension().map_or(true, |ext| ext != ENTRY_EXTENSION) {
                continue;
            }
            let Some((name, _)) = Self::read_entry_file(&path)? else {
                continue;
            };
            if name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_vault() -> (TempDir, FileVault) {
        let dir = TempDir::new().unwrap();
        let vault = FileVault::open(dir.path().join("vault")).unwrap();
        (dir, vault)
    }

    #[test]
    fn set_get_and_delete_entry() {
        let (_dir, vault) = test_vault();
        assert!(vault.get("master").unwrap().is_none());

        vault.set("master", b"abc").unwrap();
        assert_eq!(vault.get("master").unwrap().unwrap(), b"abc");

        vault.set("master", b"def").unwrap();
        assert_eq!(vault.get("master").unwrap().unwrap(), b"def");

        assert!(vault.delete("master").unwrap());
        assert!(!vault.delete("master").unwrap());
        assert!(vault.get("master").unwrap().is_none());
    }

    #[test]
    fn entry_names_with_path_characters_stay_inside_root() {
        let (_dir, vault) = test_vault();
        vault.set("health_data_../../etc_x", b"v").unwrap();
        let files: Vec<_> = fs::read_dir(vault.root()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(
            vault.get("health_data_../../etc_x").unwrap().unwrap(),
            b"v"
        );
    }

    #[test]
    fn long_entry_names_are_supported() {
        let (_dir, vault) = test_vault();
        let name = format!("health_data_{}", "u".repeat(600));
        vault.set(&name, b"long").unwrap();
        assert_eq!(vault.get(&name).unwrap().unwrap(), b"long");
        assert_eq!(vault.entries_with_prefix("health_data_").unwrap(), vec![name]);
    }

    #[test]
    fn prefix_listing_reads_names() {
        let (_dir, vault) = test_vault();
        vault.set("health_data_u1_a", b"1").unwrap();
        vault.set("health_data_u1_b", b"2").unwrap();
        vault.set("health_data_u2_a", b"3").unwrap();
        vault.set("master", b"k").unwrap();

        let names = vault.entries_with_prefix("health_data_u1_").unwrap();
        assert_eq!(names, vec!["health_data_u1_a", "health_data_u1_b"]);
        assert_eq!(vault.entries_with_prefix("").unwrap().len(), 4);
    }

    #[test]
    fn concurrent_writers_of_one_entry_never_interleave() {
        let (_dir, vault) = test_vault();
        let values: Vec<Vec<u8>> = (1..=8u8).map(|n| vec![n; 4096 * n as usize]).collect();

        std::thread::scope(|scope| {
            for value in &values {
                let vault = &vault;
                scope.spawn(move || {
                    for _ in 0..10 {
                        vault.set("health_data_u1_x", value).unwrap();
                    }
                });
            }
        });

        let stored = vault.get("health_data_u1_x").unwrap().unwrap();
        assert!(values.contains(&stored));
        let leftovers = fs::read_dir(vault.root())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn rejects_control_characters() {
        let (_dir, vault) = test_vault();
        assert!(matches!(
            vault.set("bad\nname", b"x"),
            Err(VaultError::InvalidEntryName(_))
        ));
    }

    #[test]
    fn open_fails_when_root_is_a_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-dir");
        fs::write(&path, b"x").unwrap();
        assert!(matches!(
            FileVault::open(&path),
            Err(VaultError::Unavailable(_))
        ));
    }
}
