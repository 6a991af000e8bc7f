pub mod archive;
pub mod flatten;
pub mod loader;
pub mod tables;
