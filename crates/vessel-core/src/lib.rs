#![doc = include_str!("../README.md")]

pub mod container;
pub mod descriptor;
pub mod error;
pub mod handler;
pub mod io;
pub mod language;
pub mod media_info;

pub use container::MediaContainer;
pub use descriptor::{PackagingParams, StreamDescriptor};
pub use error::{PackagerError, Result};
pub use handler::{chain, MediaHandler, OriginHandler, StreamData};
