pub mod ask;
pub mod dataset;

pub use ask::*;
pub use dataset::*;
