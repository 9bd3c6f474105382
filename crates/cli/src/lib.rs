//! Weft runner library
//!
//! Loading program graphs and engine configuration from disk, plus the
//! small set of demo sites the `weft` binary links programs against.

pub mod load;
pub mod sites;

pub use load::{LoadError, load_config, load_program};
pub use sites::demo_sites;
