// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Phantom-typed ids, image references, and per-call context.

mod context;
mod id;
mod image_ref;

pub use context::{CallContext, Metadata};
pub use id::{ContainerId, ImageId};
pub use image_ref::{ImageRef, ParseImageRefError};
