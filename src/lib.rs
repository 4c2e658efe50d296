pub mod animator;
pub mod config;
pub mod decoding;
pub mod encoding;
pub mod error_codes;
pub mod frame;
pub mod glyphs;
pub mod grid;
pub mod painter;
pub mod session;
pub mod sources;
pub mod surface;
