//! Vision side of the pipeline: turning an uploaded MRI file into a model
//! input tensor and asking the model server for a class prediction.
//!
//! The network itself is served out of process (KServe v2 inference
//! protocol); this crate owns input validation, preprocessing and the
//! request/response contract.

pub mod classifier;
pub mod error;
pub mod preprocess;
pub mod protocol;

pub use classifier::{softmax, RemoteClassifier, VisionClassifier};
pub use error::VisionError;
pub use preprocess::{load_image, prepare_bytes, PreparedImage, SourceFormat};
pub use protocol::{InferTensor, InferenceClient, TensorData};
