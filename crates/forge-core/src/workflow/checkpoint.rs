//! Workflow checkpointing (spec §3, §4.2).
//!
//! A checkpoint is written after every batch completes and is the unit the
//! runtime resumes from after a crash: stage, last completed batch index,
//! per-task statuses, and an opaque resumable state blob. The on-disk/over-
//! the-wire encoding wraps the bincode payload with a magic+version+CRC32
//! header so a torn write or a format change is detected at load time rather
//! than silently deserializing garbage.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::ids::{TaskId, WorkflowId};
use crate::task::TaskStatus;
use crate::workflow::state::WorkflowState;

const CHECKPOINT_MAGIC: &[u8; 4] = b"FCHK";
const CHECKPOINT_FORMAT_VERSION: u32 = 1;
const CHECKPOINT_HEADER_SIZE: usize = 20;

/// Failure modes for the checkpoint integrity header.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CheckpointIntegrityError {
    #[error("checkpoint payload too small: {size} bytes (minimum {minimum} bytes)")]
    FileTooSmall { size: usize, minimum: usize },

    #[error("invalid checkpoint magic bytes: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported checkpoint format version: found {found}, supported up to {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("checkpoint checksum mismatch (data corruption): expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("checkpoint length mismatch: declared {declared} bytes, actual {actual} bytes")]
    LengthMismatch { declared: u64, actual: u64 },
}

/// Wraps/unwraps checkpoint payloads with an integrity header.
///
/// Layout (20-byte header + payload):
/// - bytes 0-3: magic `"FCHK"`
/// - bytes 4-7: format version (u32 LE)
/// - bytes 8-11: CRC32 of the payload (u32 LE)
/// - bytes 12-19: payload length (u64 LE)
/// - bytes 20+: payload (bincode-serialized [`WorkflowCheckpoint`])
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointWithIntegrity;

impl CheckpointWithIntegrity {
    /// Prepend the integrity header to a raw payload.
    pub fn wrap(data: &[u8]) -> Vec<u8> {
        let checksum = crc32fast::hash(data);
        let length = data.len() as u64;

        let mut result = Vec::with_capacity(CHECKPOINT_HEADER_SIZE + data.len());
        result.extend_from_slice(CHECKPOINT_MAGIC);
        result.extend_from_slice(&CHECKPOINT_FORMAT_VERSION.to_le_bytes());
        result.extend_from_slice(&checksum.to_le_bytes());
        result.extend_from_slice(&length.to_le_bytes());
        result.extend_from_slice(data);
        result
    }

    /// Verify the header and return the payload slice, or the specific
    /// failure.
    pub fn unwrap(data: &[u8]) -> std::result::Result<&[u8], CheckpointIntegrityError> {
        if data.len() < CHECKPOINT_HEADER_SIZE {
            return Err(CheckpointIntegrityError::FileTooSmall {
                size: data.len(),
                minimum: CHECKPOINT_HEADER_SIZE,
            });
        }

        let magic: [u8; 4] = data[0..4].try_into().expect("checked length above");
        if &magic != CHECKPOINT_MAGIC {
            return Err(CheckpointIntegrityError::InvalidMagic {
                expected: *CHECKPOINT_MAGIC,
                found: magic,
            });
        }

        let version = u32::from_le_bytes(data[4..8].try_into().expect("checked length above"));
        if version > CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointIntegrityError::UnsupportedVersion {
                found: version,
                supported: CHECKPOINT_FORMAT_VERSION,
            });
        }

        let stored_checksum = u32::from_le_bytes(data[8..12].try_into().expect("checked length above"));
        let declared_length = u64::from_le_bytes(data[12..20].try_into().expect("checked length above"));
        let payload = &data[CHECKPOINT_HEADER_SIZE..];

        let actual_length = payload.len() as u64;
        if declared_length != actual_length {
            return Err(CheckpointIntegrityError::LengthMismatch {
                declared: declared_length,
                actual: actual_length,
            });
        }

        let computed_checksum = crc32fast::hash(payload);
        if stored_checksum != computed_checksum {
            return Err(CheckpointIntegrityError::ChecksumMismatch {
                expected: stored_checksum,
                computed: computed_checksum,
            });
        }

        Ok(payload)
    }

    /// Best-effort sniff for whether `data` carries the integrity header.
    pub fn is_wrapped(data: &[u8]) -> bool {
        data.len() >= 4 && &data[0..4] == CHECKPOINT_MAGIC
    }
}

/// Persisted workflow snapshot (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub workflow_id: WorkflowId,
    pub state: WorkflowState,
    pub last_completed_batch: Option<usize>,
    pub task_statuses: HashMap<TaskId, TaskStatus>,
    /// Opaque resumable state blob (e.g. the serialized shared context and
    /// collected task results); the runtime treats this as a black box.
    pub state_blob: Vec<u8>,
}

impl WorkflowCheckpoint {
    /// Serialize to bytes with the integrity header applied.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        Ok(CheckpointWithIntegrity::wrap(&payload))
    }

    /// Decode bytes previously produced by [`Self::encode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        let payload = CheckpointWithIntegrity::unwrap(data)?;
        Ok(bincode::deserialize(payload)?)
    }
}

/// Durable checkpoint storage the runtime resumes from after a crash.
/// Real backends (e.g. `forge-postgres-store`) persist to a
/// `workflow_checkpoints` table; the in-memory impl below backs tests.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()>;

    /// The most recently saved checkpoint for `workflow_id`, if any.
    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowCheckpoint>>;
}

/// In-memory reference [`Checkpointer`]. Round-trips through the same
/// encode/decode path real backends use, so a bug in the integrity header
/// would still be caught by tests against this impl.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    store: parking_lot::Mutex<HashMap<WorkflowId, Vec<u8>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let encoded = checkpoint.encode()?;
        self.store.lock().insert(checkpoint.workflow_id, encoded);
        Ok(())
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowCheckpoint>> {
        let Some(bytes) = self.store.lock().get(&workflow_id).cloned() else {
            return Ok(None);
        };
        Ok(Some(WorkflowCheckpoint::decode(&bytes)?))
    }
}
