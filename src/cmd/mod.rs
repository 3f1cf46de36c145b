pub mod matrix;
pub mod progress;
