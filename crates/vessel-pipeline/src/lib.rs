#![doc = include_str!("../README.md")]

pub mod builder;
pub mod format;
pub mod hls;
pub mod job_manager;
pub mod listener;
pub mod mpd;
pub mod packager;
pub mod validate;
pub mod version;

pub use format::get_output_format;
pub use job_manager::JobManager;
pub use packager::Packager;
