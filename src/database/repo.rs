use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::schema::SCHEMA;
use crate::error::DeepSeeError;
use crate::fingerprint::hamming_distance;

/// Sentinel stored in `events.content_hash` for events not tied to an image.
pub const SYSTEM_SENTINEL: &str = "system";

/// One row of the `images` table.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub content_hash: String,
    pub perceptual_hash: String,
    pub file_path: String,
    pub first_seen_ts: String,
    pub last_seen_ts: String,
}

/// Explicitly constructed persistence handle: one SQLite connection owning
/// the `images` fingerprint table and the append-only `events` ledger.
///
/// Every write commits immediately; there is no cross-call buffering, so the
/// custody trail reflects all completed steps even if the process dies.
pub struct CustodyStore {
    conn: Connection,
}

impl CustodyStore {
    pub fn open(path: &Path) -> Result<Self, DeepSeeError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Isolated store for tests.
    pub fn open_in_memory() -> Result<Self, DeepSeeError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert or refresh an image fingerprint. `first_seen_ts` is written
    /// once and preserved across re-encounters; `last_seen_ts` always moves
    /// to now. Safe to call repeatedly for the same content hash.
    pub fn upsert_image(
        &self,
        content_hash: &str,
        perceptual_hash: &str,
        file_path: &str,
    ) -> Result<(), DeepSeeError> {
        let ts = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO images
                 (content_hash, perceptual_hash, file_path, first_seen_ts, last_seen_ts)
             VALUES (?1, ?2, ?3,
                 COALESCE((SELECT first_seen_ts FROM images WHERE content_hash = ?1), ?4),
                 ?4)",
            params![content_hash, perceptual_hash, file_path, ts],
        )?;
        Ok(())
    }

    pub fn get_image(&self, content_hash: &str) -> Result<Option<ImageRecord>, DeepSeeError> {
        let record = self
            .conn
            .query_row(
                "SELECT content_hash, perceptual_hash, file_path, first_seen_ts, last_seen_ts
                 FROM images WHERE content_hash = ?1",
                params![content_hash],
                |row| {
                    Ok(ImageRecord {
                        content_hash: row.get(0)?,
                        perceptual_hash: row.get(1)?,
                        file_path: row.get(2)?,
                        first_seen_ts: row.get(3)?,
                        last_seen_ts: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Append one custody event. `None` content hash is normalized to the
    /// "system" sentinel. A write failure propagates; the ledger never
    /// fails silently.
    pub fn append(
        &self,
        content_hash: Option<&str>,
        action: &str,
        actor: &str,
        details: &str,
    ) -> Result<(), DeepSeeError> {
        let hash = content_hash.unwrap_or(SYSTEM_SENTINEL);
        let ts = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO events (content_hash, timestamp, action, actor, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![hash, ts, action, actor, details],
        )?;
        Ok(())
    }

    /// Details of all events with the given action, in append order.
    pub fn events_for_action(&self, action: &str) -> Result<Vec<String>, DeepSeeError> {
        let mut stmt = self
            .conn
            .prepare("SELECT details FROM events WHERE action = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![action], |row| row.get::<_, String>(0))?;
        let mut details = Vec::new();
        for row in rows {
            details.push(row?);
        }
        Ok(details)
    }

    /// Linear scan of all stored perceptual hashes for one within
    /// `max_distance` bits of the candidate. O(n) per call; fine at
    /// workstation volumes, a known scaling limit beyond that. Malformed or
    /// empty stored hashes are skipped.
    pub fn is_near_duplicate(
        &self,
        perceptual_hash: &str,
        max_distance: u32,
    ) -> Result<bool, DeepSeeError> {
        let mut stmt = self.conn.prepare("SELECT perceptual_hash FROM images")?;
        let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;
        for row in rows {
            let stored = match row? {
                Some(s) => s,
                None => continue,
            };
            if let Some(d) = hamming_distance(&stored, perceptual_hash) {
                if d <= max_distance {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_normalizes_missing_hash_to_system() {
        let store = CustodyStore::open_in_memory().unwrap();
        store.append(None, "detector_unavailable", "detector", "no backend").unwrap();

        let hash: String = store
            .conn
            .query_row("SELECT content_hash FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hash, SYSTEM_SENTINEL);
    }

    #[test]
    fn events_for_action_returns_details_in_append_order() {
        let store = CustodyStore::open_in_memory().unwrap();
        store.append(Some("abc"), "trainer_flag", "trainer", "flagged AI").unwrap();
        store.append(Some("abc"), "calibration", "calibrate", "human=0.5000").unwrap();
        store.append(Some("def"), "trainer_flag", "trainer", "flagged Human").unwrap();

        let flags = store.events_for_action("trainer_flag").unwrap();
        assert_eq!(flags, vec!["flagged AI".to_string(), "flagged Human".to_string()]);
    }

    #[test]
    fn upsert_preserves_first_seen_across_calls() {
        let store = CustodyStore::open_in_memory().unwrap();
        store.upsert_image("hash1", "aa", "/images/a.png").unwrap();
        let first = store.get_image("hash1").unwrap().unwrap();

        store.upsert_image("hash1", "bb", "/images/renamed.png").unwrap();
        let second = store.get_image("hash1").unwrap().unwrap();

        assert_eq!(second.first_seen_ts, first.first_seen_ts);
        assert_eq!(second.perceptual_hash, "bb");
        assert_eq!(second.file_path, "/images/renamed.png");
    }

    #[test]
    fn near_duplicate_false_on_empty_store() {
        let store = CustodyStore::open_in_memory().unwrap();
        assert!(!store.is_near_duplicate("00ff00ff", 5).unwrap());
    }

    #[test]
    fn near_duplicate_true_for_identical_hash() {
        let store = CustodyStore::open_in_memory().unwrap();
        store.upsert_image("h1", "00ff00ff", "/a.png").unwrap();
        assert!(store.is_near_duplicate("00ff00ff", 0).unwrap());
    }

    #[test]
    fn near_duplicate_respects_distance_bound() {
        let store = CustodyStore::open_in_memory().unwrap();
        // Differs from candidate by exactly one bit.
        store.upsert_image("h1", "00ff00fe", "/a.png").unwrap();
        assert!(store.is_near_duplicate("00ff00ff", 1).unwrap());
        assert!(!store.is_near_duplicate("00ff00ff", 0).unwrap());
    }

    #[test]
    fn near_duplicate_skips_malformed_entries() {
        let store = CustodyStore::open_in_memory().unwrap();
        store.upsert_image("h1", "not-hex", "/a.png").unwrap();
        store.upsert_image("h2", "", "/b.png").unwrap();
        store.upsert_image("h3", "00ff00ff", "/c.png").unwrap();
        assert!(store.is_near_duplicate("00ff00ff", 5).unwrap());
        assert!(!store.is_near_duplicate("ffffffff", 5).unwrap());
    }
}
