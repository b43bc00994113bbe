//! Media acquisition
//!
//! Camera, microphone and screen capture behind a platform trait, plus the
//! stream handles the rest of the crate consumes.

pub mod constraints;
pub mod manager;
pub mod stream;
pub mod traits;

pub use constraints::{AudioConstraints, MediaConstraints, MediaScenario, VideoConstraints};
pub use manager::{MediaEvent, MediaEventKind, MediaManager, MediaStats};
pub use stream::{MediaStream, MediaTrack, StreamInfo, StreamSource, TrackKind};
pub use traits::{DeviceInfo, DeviceKind, DeviceList, MediaDevices, MediaError, Resolution};
