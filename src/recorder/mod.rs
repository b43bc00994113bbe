//! Local recording system
//!
//! This module implements chunked, crash-tolerant recording:
//! - CaptureDevice trait for platform recorders, with a stream-backed default
//! - RecordingStore for durable chunk and session records
//! - RecordingEngine to run one capture per participant

pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod state;
pub mod store;

pub use device::{
    resolve_mime_type, CaptureDevice, CaptureDeviceFactory, CaptureEvent, StreamRecorder, StreamRecorderFactory,
    FALLBACK_MIME_TYPES,
};
pub use engine::RecordingEngine;
pub use error::{RecordingError, RecordingResult};
pub use events::{RecordingEvent, RecordingEventKind};
pub use state::{
    CaptureSettings, RecordingBlob, RecordingChunk, RecordingSession, RecordingStatus, StorageEstimate,
};
pub use store::{RecordingStore, SledRecordingStore, StoreError};
