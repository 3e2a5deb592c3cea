//! Structure registry
//!
//! The structure registry maps a structure name to its layout descriptor.
//! Descriptors are immutable once registered and shared with object records
//! through `Arc`.

use super::field::{DataKind, FieldDescriptor, POINTER_SIZE};
use crate::{MldError, MldResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;

/// Primitive pseudo-types registered by [`StructRegistry::init_primitive_types`]
pub const PRIMITIVE_TYPES: &[(&str, usize)] = &[
    ("uint8_t", 1),
    ("char", 1),
    ("uint32_t", 4),
    ("int32_t", 4),
    ("int", 4),
    ("float", 4),
    ("double", 8),
    ("void*", POINTER_SIZE),
    ("pointer", POINTER_SIZE),
];

/// Layout of one host structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureDescriptor {
    name: String,
    size: usize,
    fields: Vec<FieldDescriptor>,
}

impl StructureDescriptor {
    /// Structure name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total size of one instance in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fields in declaration order
    #[inline]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the structure has no fields (primitive pseudo-types)
    pub fn is_primitive(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check if the engine has to look inside instances of this type
    pub fn has_pointers(&self) -> bool {
        self.fields
            .iter()
            .any(|f| f.kind.is_pointer() || f.kind == DataKind::ObjStruct)
    }

    /// Iterate over fields holding pointers (embedded structures excluded)
    pub fn pointer_fields(&self) -> impl Iterator<Item = &FieldDescriptor> + '_ {
        self.fields.iter().filter(|f| f.kind.is_pointer())
    }

    fn validate(name: &str, size: usize, fields: &[FieldDescriptor]) -> MldResult<()> {
        let invalid = |reason: String| MldError::InvalidLayout {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("structure name is empty".to_string()));
        }
        if size == 0 {
            return Err(invalid("structure size is zero".to_string()));
        }

        let mut seen = FxHashSet::default();
        for field in fields {
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("field `{}` declared twice", field.name)));
            }
            if field.size == 0 {
                return Err(invalid(format!("field `{}` has size zero", field.name)));
            }
            match field.offset.checked_add(field.size) {
                Some(end) if end <= size => {}
                _ => {
                    return Err(invalid(format!(
                        "field `{}` at offset {} with size {} exceeds structure size {}",
                        field.name, field.offset, field.size, size
                    )))
                }
            }
            if field.kind.is_pointer() && field.size != POINTER_SIZE {
                return Err(invalid(format!(
                    "pointer field `{}` has size {}, expected {}",
                    field.name, field.size, POINTER_SIZE
                )));
            }
            if field.kind.needs_nested_type()
                && field.nested_type.as_deref().map_or(true, str::is_empty)
            {
                return Err(invalid(format!(
                    "{} field `{}` does not name a nested structure",
                    field.kind, field.name
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for StructureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "|------------------------------------------------------|")?;
        writeln!(
            f,
            "| {:<20} | size = {:<8} | #flds = {:<3} |",
            self.name,
            self.size,
            self.fields.len()
        )?;
        writeln!(f, "|------------------------------------------------------|")?;
        for (i, field) in self.fields.iter().enumerate() {
            writeln!(f, "  {:<3} {}", i, field)?;
        }
        Ok(())
    }
}

/// Registry of structure descriptors, keyed by name
#[derive(Debug, Clone, Default)]
pub struct StructRegistry {
    structs: FxHashMap<String, Arc<StructureDescriptor>>,

    /// Registration order, for listings
    order: Vec<Arc<StructureDescriptor>>,
}

impl StructRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the primitive pseudo-types already registered
    pub fn with_primitives() -> Self {
        let mut registry = Self::new();
        registry.init_primitive_types();
        registry
    }

    /// Register the primitive pseudo-types that are not yet present
    pub fn init_primitive_types(&mut self) {
        for &(name, size) in PRIMITIVE_TYPES {
            if !self.contains(name) {
                self.insert(StructureDescriptor {
                    name: name.to_string(),
                    size,
                    fields: Vec::new(),
                });
            }
        }
    }

    /// Register a structure
    ///
    /// Fails without touching the registry if the name is taken or the
    /// layout is inconsistent.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        size: usize,
        fields: Vec<FieldDescriptor>,
    ) -> MldResult<Arc<StructureDescriptor>> {
        let name = name.into();
        if self.contains(&name) {
            return Err(MldError::DuplicateStructureName { name });
        }
        StructureDescriptor::validate(&name, size, &fields)?;

        tracing::debug!(structure = %name, size, fields = fields.len(), "registered structure");
        Ok(self.insert(StructureDescriptor { name, size, fields }))
    }

    fn insert(&mut self, descriptor: StructureDescriptor) -> Arc<StructureDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.structs
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        self.order.push(Arc::clone(&descriptor));
        descriptor
    }

    /// Get a descriptor by name
    pub fn lookup(&self, name: &str) -> Option<&Arc<StructureDescriptor>> {
        self.structs.get(name)
    }

    /// Get a descriptor by name, failing with `UnknownStructureName`
    pub fn require(&self, name: &str) -> MldResult<&Arc<StructureDescriptor>> {
        self.lookup(name)
            .ok_or_else(|| MldError::UnknownStructureName {
                name: name.to_string(),
            })
    }

    /// Check if a structure is registered
    pub fn contains(&self, name: &str) -> bool {
        self.structs.contains_key(name)
    }

    /// Iterate over descriptors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<StructureDescriptor>> + '_ {
        self.order.iter()
    }

    /// `(structure, field, nested type)` for every nested name that is not registered
    pub fn unresolved_references(&self) -> Vec<(String, String, String)> {
        let mut missing = Vec::new();
        for descriptor in &self.order {
            for field in &descriptor.fields {
                if let Some(nested) = &field.nested_type {
                    if !self.contains(nested) {
                        missing.push((
                            descriptor.name.clone(),
                            field.name.clone(),
                            nested.clone(),
                        ));
                    }
                }
            }
        }
        missing
    }

    /// Get the number of registered structures
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Display for StructRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "No of Structures Registered = {}", self.len())?;
        for (i, descriptor) in self.order.iter().enumerate() {
            writeln!(f, "structure No : {} ({:p})", i, Arc::as_ptr(descriptor))?;
            write!(f, "{}", descriptor)?;
        }
        Ok(())
    }
}

/// Builder for one structure descriptor
///
/// Offsets come from the host's `#[repr(C)]` type, usually via
/// `std::mem::offset_of!`.
pub struct StructureBuilder {
    name: String,
    size: usize,
    fields: Vec<FieldDescriptor>,
}

impl StructureBuilder {
    /// Start a structure of `size` bytes
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            fields: Vec::new(),
        }
    }

    /// Add an arbitrary field
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a scalar field of `kind` with its natural width
    ///
    /// `kind` must not be `ObjStruct`; use [`StructureBuilder::embedded`].
    pub fn scalar(self, name: &str, kind: DataKind, offset: usize) -> Self {
        let size = kind.natural_size().unwrap_or(0);
        self.field(FieldDescriptor::new(name, kind, size, offset))
    }

    /// Add an array of `len` scalars of `kind`
    pub fn array(self, name: &str, kind: DataKind, offset: usize, len: usize) -> Self {
        // An overflowing length is left for validation to reject
        let size = kind
            .natural_size()
            .unwrap_or(0)
            .checked_mul(len)
            .unwrap_or(usize::MAX);
        self.field(FieldDescriptor::new(name, kind, size, offset))
    }

    /// Add an `int32` field
    pub fn int32(self, name: &str, offset: usize) -> Self {
        self.scalar(name, DataKind::Int32, offset)
    }

    /// Add a `uint32` field
    pub fn uint32(self, name: &str, offset: usize) -> Self {
        self.scalar(name, DataKind::UInt32, offset)
    }

    /// Add a `float` field
    pub fn float(self, name: &str, offset: usize) -> Self {
        self.scalar(name, DataKind::Float, offset)
    }

    /// Add a `char[len]` field
    pub fn chars(self, name: &str, offset: usize, len: usize) -> Self {
        self.array(name, DataKind::Char, offset, len)
    }

    /// Add an object pointer to a `nested` structure
    pub fn pointer(self, name: &str, offset: usize, nested: &str) -> Self {
        self.field(FieldDescriptor::pointer(name, offset, nested))
    }

    /// Add an untyped pointer
    pub fn raw_pointer(self, name: &str, offset: usize) -> Self {
        self.field(FieldDescriptor::raw_pointer(name, offset))
    }

    /// Add an embedded `nested` structure occupying `size` bytes
    pub fn embedded(self, name: &str, offset: usize, size: usize, nested: &str) -> Self {
        self.field(FieldDescriptor::embedded(name, offset, size, nested))
    }

    /// Register the structure
    pub fn register(self, registry: &mut StructRegistry) -> MldResult<Arc<StructureDescriptor>> {
        registry.register(self.name, self.size, self.fields)
    }
}
