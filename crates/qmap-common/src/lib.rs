pub mod math;
pub mod parser;
pub mod winding;
