//! Shared support for the map exporter: logging and the pk3 mount tree.
#![forbid(unsafe_code)]

pub mod logging;
pub mod vfs;
