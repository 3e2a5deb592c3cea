//! Object registry
//!
//! One record per tracked allocation, keyed by base address. Lookups resolve
//! interior pointers: any address inside a record's extent finds that record.

use crate::types::{StructRegistry, StructureDescriptor};
use crate::{MldError, MldResult};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Where the memory behind a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOrigin {
    /// Allocated through the tracked heap (`xcalloc`)
    Heap,
    /// Host-owned memory registered by address (globals, statics)
    External,
}

/// A tracked allocation
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    address: usize,
    units: usize,
    descriptor: Arc<StructureDescriptor>,
    visited: bool,
    is_root: bool,
    origin: ObjectOrigin,

    /// Registration sequence number
    seq: u64,
}

impl ObjectRecord {
    /// Base address
    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Number of contiguous instances
    #[inline]
    pub fn units(&self) -> usize {
        self.units
    }

    /// Layout of one instance
    #[inline]
    pub fn descriptor(&self) -> &Arc<StructureDescriptor> {
        &self.descriptor
    }

    /// Name of the instance type
    #[inline]
    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    /// Total extent in bytes (units × type size)
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.units * self.descriptor.size()
    }

    /// Address range covered by this record
    #[inline]
    pub fn extent(&self) -> Range<usize> {
        self.address..self.address + self.size_bytes()
    }

    /// Check if `address` falls inside this record
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        self.extent().contains(&address)
    }

    /// Visited during the last reachability pass
    #[inline]
    pub fn is_visited(&self) -> bool {
        self.visited
    }

    /// Declared as a root
    #[inline]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Where the memory came from
    #[inline]
    pub fn origin(&self) -> ObjectOrigin {
        self.origin
    }
}

impl fmt::Display for ObjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ptr = {:<#14x} | units = {:<4} | struct_name = {:<12} | is_root = {}",
            self.address,
            self.units,
            self.type_name(),
            if self.is_root { "TRUE" } else { "FALSE" },
        )
    }
}

/// Registry of tracked allocations
#[derive(Debug)]
pub struct ObjectRegistry {
    /// Structure descriptors for type lookups
    structs: Arc<StructRegistry>,

    /// Records keyed by base address; extents never overlap
    records: BTreeMap<usize, ObjectRecord>,

    next_seq: u64,
}

impl ObjectRegistry {
    /// Create an empty object registry over a structure registry
    pub fn new(structs: Arc<StructRegistry>) -> Self {
        Self {
            structs,
            records: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// The structure registry used for type lookups
    pub fn structs(&self) -> &Arc<StructRegistry> {
        &self.structs
    }

    /// Track `units` instances of `type_name` starting at `address`
    ///
    /// # Safety
    ///
    /// `address` must stay valid for reads of `units × size` bytes until the
    /// record is unregistered; reachability passes read pointer fields from it.
    pub unsafe fn register(
        &mut self,
        address: usize,
        units: usize,
        type_name: &str,
        is_root: bool,
    ) -> MldResult<&ObjectRecord> {
        self.register_with_origin(address, units, type_name, is_root, ObjectOrigin::External)
    }

    /// # Safety
    ///
    /// Same contract as [`ObjectRegistry::register`].
    pub(crate) unsafe fn register_with_origin(
        &mut self,
        address: usize,
        units: usize,
        type_name: &str,
        is_root: bool,
        origin: ObjectOrigin,
    ) -> MldResult<&ObjectRecord> {
        let descriptor = Arc::clone(self.structs.require(type_name)?);
        if address == 0 {
            return Err(MldError::NullAddress);
        }
        if units == 0 {
            return Err(MldError::InvalidUnitCount { units });
        }
        let end = units
            .checked_mul(descriptor.size())
            .and_then(|len| address.checked_add(len))
            .ok_or(MldError::ExtentOverflow { address, units })?;

        if let Some((&base, prev)) = self.records.range(..=address).next_back() {
            if base == address {
                return Err(MldError::DuplicateObjectRegistration { address });
            }
            if prev.extent().end > address {
                return Err(MldError::OverlappingObject {
                    address,
                    existing: base,
                });
            }
        }
        if let Some((&next, _)) = self.records.range(address + 1..).next() {
            if next < end {
                return Err(MldError::OverlappingObject {
                    address,
                    existing: next,
                });
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        tracing::debug!(
            address = format_args!("{:#x}", address),
            units,
            structure = descriptor.name(),
            is_root,
            "tracking object"
        );

        let record = self.records.entry(address).or_insert(ObjectRecord {
            address,
            units,
            descriptor,
            visited: false,
            is_root,
            origin,
            seq,
        });
        Ok(record)
    }

    /// Find the record whose extent contains `address`
    pub fn lookup(&self, address: usize) -> Option<&ObjectRecord> {
        self.records
            .range(..=address)
            .next_back()
            .map(|(_, record)| record)
            .filter(|record| record.contains(address))
    }

    /// Find the record starting exactly at `address`
    pub fn lookup_exact(&self, address: usize) -> Option<&ObjectRecord> {
        self.records.get(&address)
    }

    /// Declare the record at `address` a root
    pub fn mark_root(&mut self, address: usize) -> MldResult<()> {
        let record = self
            .records
            .get_mut(&address)
            .ok_or(MldError::UnknownObject { address })?;
        record.is_root = true;
        Ok(())
    }

    /// Stop tracking the record at `address`
    pub fn unregister(&mut self, address: usize) -> MldResult<ObjectRecord> {
        let record = self
            .records
            .remove(&address)
            .ok_or(MldError::UnknownObject { address })?;
        tracing::debug!(
            address = format_args!("{:#x}", address),
            structure = record.type_name(),
            "untracking object"
        );
        Ok(record)
    }

    /// Iterate over records in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ObjectRecord> + '_ {
        let mut records: Vec<&ObjectRecord> = self.records.values().collect();
        records.sort_by_key(|record| record.seq);
        records.into_iter()
    }

    /// Base addresses of root records, in registration order
    pub fn roots(&self) -> Vec<usize> {
        self.iter()
            .filter(|record| record.is_root)
            .map(|record| record.address)
            .collect()
    }

    /// Get the number of tracked records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of all record extents
    pub fn tracked_bytes(&self) -> usize {
        self.records.values().map(ObjectRecord::size_bytes).sum()
    }

    /// Clear every visited flag (start of a pass)
    pub(crate) fn reset_visited(&mut self) {
        for record in self.records.values_mut() {
            record.visited = false;
        }
    }

    /// Mark the record at `base` visited; returns false if it already was
    pub(crate) fn visit(&mut self, base: usize) -> bool {
        match self.records.get_mut(&base) {
            Some(record) if !record.visited => {
                record.visited = true;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Printing OBJECT DATABASE")?;
        for (i, record) in self.iter().enumerate() {
            writeln!(f, "{:<3} {}", i, record)?;
        }
        Ok(())
    }
}
