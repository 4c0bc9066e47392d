//! Shared text and token utilities.

pub mod text_utils;
pub mod token_estimator;

pub use text_utils::TextUtils;
pub use token_estimator::{TokenEstimator, TokenEstimatorConfig, Tokenizer};
