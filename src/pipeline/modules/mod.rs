//! Built-in modules for common document shaping

pub mod combine;
pub mod flatten;
pub mod join;
pub mod trace;

pub use combine::Combine;
pub use flatten::{Flatten, CHILDREN_KEY};
pub use join::{Join, JoinedMetadata};
pub use trace::Trace;
