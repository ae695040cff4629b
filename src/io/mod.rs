//! Local file I/O for region seeds

pub mod regions;

pub use regions::RegionReader;
