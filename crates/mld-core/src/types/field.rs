//! Field descriptors
//!
//! A field descriptor records where one member of a host structure lives and
//! how its bytes are to be interpreted during a reachability pass.

use std::fmt;

/// Size of a pointer-valued field in bytes
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// Interpretation of a field's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 32-bit integer
    Int32,
    /// Character (or character array)
    Char,
    /// Pointer to a tracked object of a declared type
    ObjPtr,
    /// Untyped pointer, resolved against whatever it points into
    VoidPtr,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Structure stored inline in the owning structure
    ObjStruct,
}

impl DataKind {
    /// Width of a single element of this kind, if it has a fixed one.
    ///
    /// Embedded structures take their width from the nested descriptor.
    pub fn natural_size(self) -> Option<usize> {
        match self {
            DataKind::UInt8 | DataKind::Char => Some(1),
            DataKind::UInt32 | DataKind::Int32 | DataKind::Float => Some(4),
            DataKind::Double => Some(8),
            DataKind::ObjPtr | DataKind::VoidPtr => Some(POINTER_SIZE),
            DataKind::ObjStruct => None,
        }
    }

    /// Whether the field holds an address the engine must follow
    #[inline]
    pub fn is_pointer(self) -> bool {
        matches!(self, DataKind::ObjPtr | DataKind::VoidPtr)
    }

    /// Whether the field needs the name of another structure
    #[inline]
    pub fn needs_nested_type(self) -> bool {
        matches!(self, DataKind::ObjPtr | DataKind::ObjStruct)
    }

    /// Upper-case tag used in record listings
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::UInt8 => "UINT8",
            DataKind::UInt32 => "UINT32",
            DataKind::Int32 => "INT32",
            DataKind::Char => "CHAR",
            DataKind::ObjPtr => "OBJ_PTR",
            DataKind::VoidPtr => "VOID_PTR",
            DataKind::Float => "FLOAT",
            DataKind::Double => "DOUBLE",
            DataKind::ObjStruct => "OBJ_STRUCT",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout of one field inside a structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,

    /// How the bytes are interpreted
    pub kind: DataKind,

    /// Size of the field in bytes
    pub size: usize,

    /// Offset of the field from the start of the owning structure
    pub offset: usize,

    /// Referenced structure for `ObjPtr` and `ObjStruct` fields
    pub nested_type: Option<String>,
}

impl FieldDescriptor {
    /// Create a field with no nested type
    pub fn new(name: impl Into<String>, kind: DataKind, size: usize, offset: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
            offset,
            nested_type: None,
        }
    }

    /// Create an object-pointer field referencing `nested`
    pub fn pointer(name: impl Into<String>, offset: usize, nested: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DataKind::ObjPtr,
            size: POINTER_SIZE,
            offset,
            nested_type: Some(nested.into()),
        }
    }

    /// Create an untyped pointer field
    pub fn raw_pointer(name: impl Into<String>, offset: usize) -> Self {
        Self::new(name, DataKind::VoidPtr, POINTER_SIZE, offset)
    }

    /// Create an embedded structure field
    pub fn embedded(
        name: impl Into<String>,
        offset: usize,
        size: usize,
        nested: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: DataKind::ObjStruct,
            size,
            offset,
            nested_type: Some(nested.into()),
        }
    }

    /// One past the last byte of this field
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} | dtype = {:<10} | size = {:<5} | offset = {:<6} | nstructname = {}",
            self.name,
            self.kind,
            self.size,
            self.offset,
            self.nested_type.as_deref().unwrap_or("nil"),
        )
    }
}
