// API handlers

pub mod download;
pub mod encryption;
pub mod file;
pub mod status;

pub use download::*;
pub use encryption::*;
pub use file::*;
pub use status::*;
