pub mod canonical;
pub mod domain;
pub mod extractor;
pub mod pipeline;
pub mod traits;
