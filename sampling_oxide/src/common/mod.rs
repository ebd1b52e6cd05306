//! Common utilities, traits, and errors

mod error;
pub mod resize;
pub mod rng;
mod serde;
pub mod validation;

pub use error::{Result, SketchError};
pub use resize::ResizeFactor;
pub use rng::SketchRng;
pub use serde::{ArrayOfLongsSerde, ArrayOfStringsSerde, ItemSerde};
