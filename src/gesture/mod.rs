pub mod classifier;
pub mod tables;

pub use classifier::{GestureClassifier, GestureTable};
