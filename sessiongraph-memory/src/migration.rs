//! Database migration utilities
//!
//! Upgrades on-disk graph layouts so existing session history survives
//! format changes.

use rocksdb::{IteratorMode, Options, DB};
use std::path::Path;

use crate::error::{MemoryError, Result};
use crate::graph::{EdgeRecord, Properties};

/// Database version stored in metadata
pub(crate) const DB_VERSION_KEY: &[u8] = b"_db_version";
pub(crate) const CURRENT_VERSION: u32 = 2;

/// Read the stored layout version. Databases without the key are v1.
fn stored_version(db: &DB) -> Result<u32> {
    match db.get(DB_VERSION_KEY)? {
        Some(bytes) => {
            let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                MemoryError::storage(format!("corrupt version key ({} bytes)", bytes.len()))
            })?;
            Ok(u32::from_le_bytes(raw))
        }
        None => Ok(1),
    }
}

/// Write the current version into a freshly opened database that has none
pub(crate) fn stamp_current_version(db: &DB) -> Result<()> {
    if db.get(DB_VERSION_KEY)?.is_none() {
        db.put(DB_VERSION_KEY, CURRENT_VERSION.to_le_bytes())?;
    }
    Ok(())
}

/// Check if database needs migration and perform if needed
pub fn migrate_if_needed(db_path: impl AsRef<Path>) -> Result<()> {
    let path = db_path.as_ref();

    if !path.join("CURRENT").exists() {
        log::debug!("No existing database found at {}, skipping migration", path.display());
        return Ok(());
    }

    let mut opts = Options::default();
    opts.create_if_missing(false);
    let db = DB::open(&opts, path)
        .map_err(|e| MemoryError::storage(format!("Failed to open database for migration: {}", e)))?;

    let current_version = stored_version(&db)?;
    log::info!(
        "Graph database version: {} (current: {})",
        current_version,
        CURRENT_VERSION
    );

    if current_version < CURRENT_VERSION {
        log::warn!(
            "Graph database needs migration from v{} to v{}",
            current_version,
            CURRENT_VERSION
        );
        perform_migration(&db, current_version)?;
        db.put(DB_VERSION_KEY, CURRENT_VERSION.to_le_bytes())?;
        db.flush()?;
        log::info!("Migration completed successfully");
    } else if current_version > CURRENT_VERSION {
        return Err(MemoryError::storage(format!(
            "database version {} is newer than supported version {}",
            current_version, CURRENT_VERSION
        )));
    }

    Ok(())
}

fn perform_migration(db: &DB, from_version: u32) -> Result<()> {
    match from_version {
        1 => migrate_v1_to_v2(db),
        other => Err(MemoryError::storage(format!(
            "Unknown database version: {}",
            other
        ))),
    }
}

/// v1 stored rows and edges as JSON; v2 stores MessagePack
fn migrate_v1_to_v2(db: &DB) -> Result<()> {
    log::info!("Migrating graph database from v1 to v2...");

    let mut rewritten = Vec::new();
    let mut skipped = 0usize;

    for item in db.iterator(IteratorMode::Start) {
        let (key, value) = item?;
        let encoded = if key.starts_with(b"node:") {
            reencode::<Properties>(&value)
        } else if key.starts_with(b"edge:") {
            reencode::<EdgeRecord>(&value)
        } else {
            continue;
        };
        match encoded {
            Some(bytes) => rewritten.push((key, bytes)),
            None => {
                log::error!(
                    "Failed to decode {} as JSON or MessagePack. Skipping.",
                    String::from_utf8_lossy(&key)
                );
                skipped += 1;
            }
        }
    }

    log::info!(
        "Rewriting {} entries ({} skipped)",
        rewritten.len(),
        skipped
    );

    for (key, bytes) in rewritten {
        db.put(&key, bytes)?;
    }
    db.flush()?;
    Ok(())
}

/// Decode JSON (v1) or already-migrated MessagePack and re-encode as MessagePack
fn reencode<T>(value: &[u8]) -> Option<Vec<u8>>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let decoded: T = match serde_json::from_slice(value) {
        Ok(v) => v,
        Err(_) => rmp_serde::from_slice(value).ok()?,
    };
    rmp_serde::to_vec_named(&decoded).ok()
}
