//! MLD Core
//!
//! Reflection-based heap leak detection for hosts that manage memory by hand:
//! - Structure type registry (layout descriptors, primitive pseudo-types)
//! - Object registry (tracked allocations, interior pointer lookup)
//! - Tracked heap backing the zero-filled allocation hook
//! - Reachability engine (worklist mark phase) and leak reporter
//!
//! # Example
//!
//! ```
//! use mld_core::{LeakDetector, StructRegistry, StructureBuilder};
//! use std::sync::Arc;
//!
//! #[repr(C)]
//! struct Node {
//!     next: *mut Node,
//!     value: i32,
//! }
//!
//! let mut structs = StructRegistry::with_primitives();
//! StructureBuilder::new("Node", std::mem::size_of::<Node>())
//!     .pointer("next", std::mem::offset_of!(Node, next), "Node")
//!     .int32("value", std::mem::offset_of!(Node, value))
//!     .register(&mut structs)
//!     .unwrap();
//!
//! let mut detector = LeakDetector::new(Arc::new(structs));
//! let head = detector.xcalloc("Node", 1).unwrap();
//! let _orphan = detector.xcalloc("Node", 1).unwrap();
//! detector.set_dynamic_object_as_root(head.as_ptr() as usize).unwrap();
//!
//! let report = detector.run_leak_check();
//! assert_eq!(report.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod context;
pub mod detector;
pub mod heap;
pub mod object;
pub mod options;
pub mod types;

pub use context::LeakDetector;
pub use detector::{DetectorStats, LeakEntry, LeakReport, PassStats, ReachabilityEngine};
pub use heap::TrackedHeap;
pub use object::{ObjectOrigin, ObjectRecord, ObjectRegistry};
pub use options::{DetectorOptions, PointerTypePolicy};
pub use types::{DataKind, FieldDescriptor, StructRegistry, StructureBuilder, StructureDescriptor};

/// Leak detector errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MldError {
    /// A structure with this name is already registered
    #[error("Duplicate structure name: {name}")]
    DuplicateStructureName {
        /// Structure name
        name: String,
    },

    /// A structure descriptor violates a layout invariant
    #[error("Invalid layout for structure {name}: {reason}")]
    InvalidLayout {
        /// Structure name
        name: String,
        /// What is wrong with the layout
        reason: String,
    },

    /// No structure with this name is registered
    #[error("Unknown structure name: {name}")]
    UnknownStructureName {
        /// Structure name
        name: String,
    },

    /// The address is already tracked
    #[error("Object at {address:#x} is already registered")]
    DuplicateObjectRegistration {
        /// Base address
        address: usize,
    },

    /// The new extent intersects an already tracked record
    #[error("Object at {address:#x} overlaps tracked object at {existing:#x}")]
    OverlappingObject {
        /// Base address of the rejected registration
        address: usize,
        /// Base address of the record it overlaps
        existing: usize,
    },

    /// Registrations need at least one unit
    #[error("Invalid unit count: {units}")]
    InvalidUnitCount {
        /// Requested unit count
        units: usize,
    },

    /// The extent `address + units × size` does not fit in the address space
    #[error("Object at {address:#x} with {units} unit(s) extends past the end of the address space")]
    ExtentOverflow {
        /// Base address
        address: usize,
        /// Requested unit count
        units: usize,
    },

    /// Registrations need a non-null address
    #[error("Cannot register a null address")]
    NullAddress,

    /// No tracked object has this base address
    #[error("No tracked object at {address:#x}")]
    UnknownObject {
        /// Address that was looked up
        address: usize,
    },

    /// The record was registered from external memory and cannot be freed here
    #[error("Object at {address:#x} was not allocated by the tracked heap")]
    NotHeapAllocated {
        /// Base address
        address: usize,
    },

    /// The heap cap would be exceeded
    #[error("Heap limit exceeded: requested {requested} bytes with {allocated} of {limit} in use")]
    HeapLimitExceeded {
        /// Bytes requested
        requested: usize,
        /// Bytes currently allocated
        allocated: usize,
        /// Configured limit
        limit: usize,
    },

    /// The system allocator refused the request
    #[error("Allocation of {size} bytes failed")]
    AllocationFailed {
        /// Bytes requested
        size: usize,
    },
}

impl MldError {
    /// Whether this error invalidates the type metadata and should stop the run.
    ///
    /// Registry-construction errors are fatal; registry-population errors
    /// only reject the single call that raised them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MldError::DuplicateStructureName { .. } | MldError::InvalidLayout { .. }
        )
    }
}

/// Leak detector result
pub type MldResult<T> = Result<T, MldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_fatality() {
        assert!(MldError::DuplicateStructureName { name: "Node".into() }.is_fatal());
        assert!(MldError::InvalidLayout {
            name: "Node".into(),
            reason: "bad".into()
        }
        .is_fatal());
        assert!(!MldError::DuplicateObjectRegistration { address: 0x10 }.is_fatal());
        assert!(!MldError::UnknownStructureName { name: "X".into() }.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = MldError::DuplicateObjectRegistration { address: 0x1000 };
        assert_eq!(err.to_string(), "Object at 0x1000 is already registered");
        let err = MldError::ExtentOverflow { address: 0x10, units: 1 };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("past the end of the address space"));
    }
}
