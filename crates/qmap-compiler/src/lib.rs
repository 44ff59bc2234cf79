// Map compilation front end: .map parsing, texture projection,
// plane/texinfo interning, brush geometry and re-serialization.

pub mod brush;
pub mod convert;
pub mod error;
pub mod game;
pub mod load;
pub mod map;
pub mod options;
pub mod parse;
pub mod process;
pub mod texdef;
pub mod texture;
