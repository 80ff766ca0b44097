pub mod api;
pub mod batch;
pub mod domain;
pub mod error;
pub mod filter;
pub mod matrix;
pub mod normalize;
pub mod output;
