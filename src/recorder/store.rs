//! Durable chunk and session storage
//!
//! [`SledRecordingStore`] keeps one sled database with four trees:
//!
//! ```text
//! chunks                   participant \0 sequence            -> metadata len | metadata | payload
//! sessions                 session id                         -> session JSON
//! sessions_by_participant  participant \0 start ms \0 id      -> session id
//! sessions_by_room         room \0 start ms \0 id             -> session id
//! ```
//!
//! Numbers in keys are zero padded to 20 digits so prefix scans come back in
//! order. A chunk is a single insert, so its metadata and payload commit
//! together. Every write is flushed before it returns.

use super::state::{RecordingChunk, RecordingSession, StorageEstimate};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Store-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Durable local store for chunks and sessions
#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Create the tables if needed. Idempotent.
    async fn open(&self) -> Result<(), StoreError>;

    async fn put_chunk(&self, chunk: &RecordingChunk) -> Result<(), StoreError>;

    /// Committed chunks with payloads, in sequence order
    async fn chunks_for_participant(&self, participant_id: &str) -> Result<Vec<RecordingChunk>, StoreError>;

    /// One past the highest committed sequence, or 0
    async fn next_sequence(&self, participant_id: &str) -> Result<u64, StoreError>;

    /// Returns the number of chunks removed
    async fn delete_chunks_for_participant(&self, participant_id: &str) -> Result<usize, StoreError>;

    async fn put_session(&self, session: &RecordingSession) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<RecordingSession>, StoreError>;

    async fn sessions_for_participant(&self, participant_id: &str) -> Result<Vec<RecordingSession>, StoreError>;

    async fn sessions_for_room(&self, room_id: &str) -> Result<Vec<RecordingSession>, StoreError>;

    async fn estimate(&self) -> Result<StorageEstimate, StoreError>;
}

struct Trees {
    db: sled::Db,
    chunks: sled::Tree,
    sessions: sled::Tree,
    by_participant: sled::Tree,
    by_room: sled::Tree,
}

/// sled-backed [`RecordingStore`]. The database is opened on first use.
pub struct SledRecordingStore {
    path: PathBuf,
    quota: u64,
    trees: OnceCell<Trees>,
}

impl SledRecordingStore {
    pub fn new(path: impl Into<PathBuf>, quota: u64) -> Self {
        Self {
            path: path.into(),
            quota,
            trees: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn trees(&self) -> Result<&Trees, StoreError> {
        self.trees
            .get_or_try_init(|| async {
                let db = sled::open(&self.path)?;
                let trees = Trees {
                    chunks: db.open_tree(b"chunks")?,
                    sessions: db.open_tree(b"sessions")?,
                    by_participant: db.open_tree(b"sessions_by_participant")?,
                    by_room: db.open_tree(b"sessions_by_room")?,
                    db,
                };
                tracing::info!("Opened recording store at {:?}", self.path);
                Ok::<_, StoreError>(trees)
            })
            .await
    }

    /// Sessions listed under `owner` in an index tree, oldest first
    async fn sessions_in(&self, index: &sled::Tree, owner: &str) -> Result<Vec<RecordingSession>, StoreError> {
        let trees = self.trees().await?;
        let mut sessions = Vec::new();
        for item in index.scan_prefix(key_prefix(owner)) {
            let (_, session_id) = item?;
            match trees.sessions.get(&session_id)? {
                Some(value) => sessions.push(serde_json::from_slice(&value)?),
                None => tracing::warn!(
                    "Index entry for {} points at missing session {}",
                    owner,
                    String::from_utf8_lossy(&session_id)
                ),
            }
        }
        Ok(sessions)
    }
}

#[async_trait]
impl RecordingStore for SledRecordingStore {
    async fn open(&self) -> Result<(), StoreError> {
        self.trees().await.map(|_| ())
    }

    async fn put_chunk(&self, chunk: &RecordingChunk) -> Result<(), StoreError> {
        let trees = self.trees().await?;
        trees
            .chunks
            .insert(chunk_key(&chunk.participant_id, chunk.sequence), encode_chunk(chunk)?)?;
        trees.db.flush_async().await?;
        Ok(())
    }

    async fn chunks_for_participant(&self, participant_id: &str) -> Result<Vec<RecordingChunk>, StoreError> {
        let trees = self.trees().await?;
        let mut chunks = Vec::new();
        for item in trees.chunks.scan_prefix(key_prefix(participant_id)) {
            let (_, value) = item?;
            chunks.push(decode_chunk(&value)?);
        }
        Ok(chunks)
    }

    async fn next_sequence(&self, participant_id: &str) -> Result<u64, StoreError> {
        let trees = self.trees().await?;
        match trees.chunks.scan_prefix(key_prefix(participant_id)).next_back() {
            Some(item) => {
                let (key, _) = item?;
                Ok(sequence_of(&key)? + 1)
            }
            None => Ok(0),
        }
    }

    async fn delete_chunks_for_participant(&self, participant_id: &str) -> Result<usize, StoreError> {
        let trees = self.trees().await?;
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for key in trees.chunks.scan_prefix(key_prefix(participant_id)).keys() {
            batch.remove(key?);
            removed += 1;
        }
        if removed > 0 {
            trees.chunks.apply_batch(batch)?;
            trees.db.flush_async().await?;
        }
        Ok(removed)
    }

    async fn put_session(&self, session: &RecordingSession) -> Result<(), StoreError> {
        let trees = self.trees().await?;
        let previous = trees
            .sessions
            .insert(session.id.as_bytes(), serde_json::to_vec(session)?)?;

        if let Some(previous) = previous {
            let previous: RecordingSession = serde_json::from_slice(&previous)?;
            trees
                .by_participant
                .remove(index_key(&previous.participant_id, &previous))?;
            trees.by_room.remove(index_key(&previous.room_id, &previous))?;
        }
        trees
            .by_participant
            .insert(index_key(&session.participant_id, session), session.id.as_bytes())?;
        trees
            .by_room
            .insert(index_key(&session.room_id, session), session.id.as_bytes())?;

        trees.db.flush_async().await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<RecordingSession>, StoreError> {
        let trees = self.trees().await?;
        match trees.sessions.get(session_id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn sessions_for_participant(&self, participant_id: &str) -> Result<Vec<RecordingSession>, StoreError> {
        let trees = self.trees().await?;
        self.sessions_in(&trees.by_participant, participant_id).await
    }

    async fn sessions_for_room(&self, room_id: &str) -> Result<Vec<RecordingSession>, StoreError> {
        let trees = self.trees().await?;
        self.sessions_in(&trees.by_room, room_id).await
    }

    async fn estimate(&self) -> Result<StorageEstimate, StoreError> {
        let trees = self.trees().await?;
        let used = trees.db.size_on_disk()?;
        Ok(StorageEstimate::new(used, self.quota))
    }
}

fn key_prefix(owner: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 1);
    key.extend_from_slice(owner.as_bytes());
    key.push(0);
    key
}

fn chunk_key(participant_id: &str, sequence: u64) -> Vec<u8> {
    let mut key = key_prefix(participant_id);
    key.extend_from_slice(format!("{:020}", sequence).as_bytes());
    key
}

fn index_key(owner: &str, session: &RecordingSession) -> Vec<u8> {
    let start_ms = session.start_time.timestamp_millis().max(0);
    let mut key = key_prefix(owner);
    key.extend_from_slice(format!("{:020}", start_ms).as_bytes());
    key.push(0);
    key.extend_from_slice(session.id.as_bytes());
    key
}

fn sequence_of(key: &[u8]) -> Result<u64, StoreError> {
    key.len()
        .checked_sub(20)
        .and_then(|start| std::str::from_utf8(&key[start..]).ok())
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| StoreError::Corrupt(format!("bad chunk key {:?}", String::from_utf8_lossy(key))))
}

fn encode_chunk(chunk: &RecordingChunk) -> Result<Vec<u8>, StoreError> {
    let metadata = serde_json::to_vec(chunk)?;
    let mut value = Vec::with_capacity(4 + metadata.len() + chunk.data.len());
    value.extend_from_slice(&(metadata.len() as u32).to_be_bytes());
    value.extend_from_slice(&metadata);
    value.extend_from_slice(&chunk.data);
    Ok(value)
}

fn decode_chunk(value: &[u8]) -> Result<RecordingChunk, StoreError> {
    let header = value
        .get(..4)
        .and_then(|h| <[u8; 4]>::try_from(h).ok())
        .ok_or_else(|| StoreError::Corrupt("chunk record shorter than its header".to_string()))?;
    let metadata_end = 4 + u32::from_be_bytes(header) as usize;
    let metadata = value
        .get(4..metadata_end)
        .ok_or_else(|| StoreError::Corrupt("chunk metadata truncated".to_string()))?;

    let mut chunk: RecordingChunk = serde_json::from_slice(metadata)?;
    let payload = &value[metadata_end..];
    if payload.len() as u64 != chunk.size {
        return Err(StoreError::Corrupt(format!(
            "chunk {} of {} is {} bytes, expected {}",
            chunk.sequence,
            chunk.participant_id,
            payload.len(),
            chunk.size
        )));
    }
    chunk.data = Bytes::copy_from_slice(payload);
    Ok(chunk)
}
