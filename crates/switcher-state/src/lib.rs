//! Nested switcher state store (C3), descriptor loading (C10), and the
//! video-source catalog referenced by tally builders.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod descriptor;
pub mod sources;
pub mod store;

pub use descriptor::{load_default, load_descriptor, DescriptorError, DEFAULT_DESCRIPTOR_XML};
pub use sources::sources_for_product;
pub use store::StateStore;
