pub mod source;

pub use source::{PointSource, SourceProvider};
