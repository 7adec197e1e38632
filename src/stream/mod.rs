//! Stream adapters over captured frames

mod reconstruct;

pub use reconstruct::{Reconstruct, ReconstructExt};
