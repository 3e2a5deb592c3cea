//! Structure type metadata
//!
//! Field and structure descriptors tell the reachability engine which bytes
//! of a tracked allocation hold pointers.

mod field;
mod registry;

pub use field::{DataKind, FieldDescriptor, POINTER_SIZE};
pub use registry::{StructRegistry, StructureBuilder, StructureDescriptor, PRIMITIVE_TYPES};
