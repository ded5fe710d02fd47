pub mod viral;

pub use viral::{score, PriorSnapshot};
