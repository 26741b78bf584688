//! Filesystem-facing services: decoding, the background catalogue and result files

pub mod backgrounds;
pub mod io;
pub mod output;

pub use backgrounds::{BackgroundEntry, BackgroundStore};
pub use io::ImageIOService;
pub use output::ResultWriter;
