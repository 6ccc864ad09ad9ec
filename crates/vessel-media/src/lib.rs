#![doc = include_str!("../README.md")]

pub mod chunking;
pub mod cue_alignment;
pub mod demuxer;
pub mod encryption;
pub mod muxer;
pub mod replicator;
pub mod sync_point_queue;
pub mod template;
pub mod text;
pub mod trick_play;

pub use chunking::ChunkingHandler;
pub use cue_alignment::{CueAlignmentHandler, CueAlignmentPort};
pub use demuxer::Demuxer;
pub use encryption::{EncryptionHandler, KeySource, RawKeySource};
pub use muxer::{Muxer, MuxerListener, MuxerOptions};
pub use replicator::Replicator;
pub use sync_point_queue::SyncPointQueue;
pub use trick_play::TrickPlayHandler;
