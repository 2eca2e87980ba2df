//! Playback sinks for the kaiwa pipeline.
//!
//! Two implementations of the `PlaybackSink` port with the same external
//! contract — play one payload start to finish, stop releases everything:
//!
//! - [`AudioPlayer`] — audio-only playback on a dedicated audio thread
//! - [`LipSyncSink`] — decoded picture frames driven from the audio clock,
//!   presented through a [`FrameSurface`]

pub mod audio;
pub mod surface;
pub mod video;

pub use audio::AudioPlayer;
pub use surface::FrameSurface;
pub use video::LipSyncSink;
