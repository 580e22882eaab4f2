pub mod ops;
pub mod patch;
