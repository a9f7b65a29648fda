#![recursion_limit = "256"]

pub mod segmenter;

pub type InferenceBackend = burn::backend::NdArray<f32>;

pub use segmenter::{InferenceError, Segmenter};

pub mod prelude {
    pub use crate::segmenter::{InferenceError, Segmenter};
    pub use crate::InferenceBackend;
}
