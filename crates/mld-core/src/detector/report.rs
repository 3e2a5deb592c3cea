//! Leak reports
//!
//! A report lists every tracked record left unvisited by the last pass,
//! in registration order. Building a report never touches the registry.

use crate::object::ObjectRegistry;
use std::fmt;

/// One leaked allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakEntry {
    /// Base address
    pub address: usize,

    /// Registered type of the allocation
    pub type_name: String,

    /// Number of instances
    pub units: usize,

    /// Total extent in bytes
    pub size_bytes: usize,
}

impl fmt::Display for LeakEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ptr = {:<#14x} | struct_name = {:<12} | units = {:<4} | size = {} bytes",
            self.address, self.type_name, self.units, self.size_bytes
        )
    }
}

/// Leaked allocations found by a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    entries: Vec<LeakEntry>,
}

impl LeakReport {
    /// Collect every unvisited record
    pub fn from_registry(objects: &ObjectRegistry) -> Self {
        let entries = objects
            .iter()
            .filter(|record| !record.is_visited())
            .map(|record| LeakEntry {
                address: record.address(),
                type_name: record.type_name().to_string(),
                units: record.units(),
                size_bytes: record.size_bytes(),
            })
            .collect();
        Self { entries }
    }

    /// Check if nothing leaked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of leaked allocations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sum of leaked extents
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.size_bytes).sum()
    }

    /// Check if the allocation at `address` leaked
    pub fn contains(&self, address: usize) -> bool {
        self.entries.iter().any(|entry| entry.address == address)
    }

    /// Iterate over leaked allocations
    pub fn iter(&self) -> std::slice::Iter<'_, LeakEntry> {
        self.entries.iter()
    }

    /// Leaked allocations as a slice
    pub fn entries(&self) -> &[LeakEntry] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a LeakReport {
    type Item = &'a LeakEntry;
    type IntoIter = std::slice::Iter<'a, LeakEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dumping Leaked Objects")?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f, "{:<3} {}", i, entry)?;
        }
        writeln!(
            f,
            "Total Leaked Objects = {} ({} bytes)",
            self.len(),
            self.total_bytes()
        )
    }
}
