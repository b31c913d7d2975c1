pub mod classifier;

pub use classifier::{use_database, Classifier, ClassifiedStatement, SqlCommand};
