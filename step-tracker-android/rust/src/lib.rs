// Step Tracker Android JNI Library
// Exposes the Rust step counting core to Kotlin via JNI

pub mod android_jni;
pub mod error;

pub use error::{BindingError, JResult};
