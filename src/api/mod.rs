pub mod classifier;

pub use classifier::BasketballClassifier;
