//! Leak detector context
//!
//! A `LeakDetector` owns everything one host needs: the shared structure
//! registry, the object registry, the tracked heap, options and statistics.
//! Every mutating operation takes `&mut self`, so registration, allocation,
//! root marking and passes are serialized by construction.

use crate::detector::{DetectorStats, LeakReport, PassStats, ReachabilityEngine};
use crate::heap::TrackedHeap;
use crate::object::{ObjectOrigin, ObjectRegistry};
use crate::options::DetectorOptions;
use crate::types::StructRegistry;
use crate::{MldError, MldResult};
use std::ptr::NonNull;
use std::sync::Arc;

/// Reflection-based leak detector
pub struct LeakDetector {
    objects: ObjectRegistry,
    heap: TrackedHeap,
    engine: ReachabilityEngine,
    options: DetectorOptions,
    stats: DetectorStats,
}

impl LeakDetector {
    /// Create a detector with default options
    pub fn new(structs: Arc<StructRegistry>) -> Self {
        Self::with_options(structs, DetectorOptions::default())
    }

    /// Create a detector with explicit options
    pub fn with_options(structs: Arc<StructRegistry>, options: DetectorOptions) -> Self {
        Self {
            objects: ObjectRegistry::new(structs),
            heap: TrackedHeap::new(options.max_heap_bytes),
            engine: ReachabilityEngine::new(options.pointer_policy),
            options,
            stats: DetectorStats::default(),
        }
    }

    /// The structure registry
    pub fn structs(&self) -> &Arc<StructRegistry> {
        self.objects.structs()
    }

    /// The object registry
    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    /// The tracked heap
    pub fn heap(&self) -> &TrackedHeap {
        &self.heap
    }

    /// Options in effect
    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    /// Cumulative pass statistics
    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    /// Allocate `units` zeroed instances of `type_name` and track them
    ///
    /// Nothing is allocated if the type is unknown.
    pub fn xcalloc(&mut self, type_name: &str, units: usize) -> MldResult<NonNull<u8>> {
        let size = self.structs().require(type_name)?.size();
        if units == 0 {
            return Err(MldError::InvalidUnitCount { units });
        }
        let bytes = units
            .checked_mul(size)
            .ok_or(MldError::InvalidUnitCount { units })?;

        let ptr = self.heap.allocate_zeroed(bytes)?;
        let address = ptr.as_ptr() as usize;

        // SAFETY: the block is `bytes` long and lives in `self.heap` until
        // `xfree` unregisters it or the detector is dropped.
        let registered = unsafe {
            self.objects
                .register_with_origin(address, units, type_name, false, ObjectOrigin::Heap)
        };
        if let Err(err) = registered {
            self.heap.free(address)?;
            return Err(err);
        }

        Ok(ptr)
    }

    /// Untrack and release an allocation made by [`LeakDetector::xcalloc`]
    pub fn xfree(&mut self, ptr: NonNull<u8>) -> MldResult<()> {
        let address = ptr.as_ptr() as usize;
        match self.objects.lookup_exact(address) {
            None => return Err(MldError::UnknownObject { address }),
            Some(record) if record.origin() != ObjectOrigin::Heap => {
                return Err(MldError::NotHeapAllocated { address })
            }
            Some(_) => {}
        }

        self.objects.unregister(address)?;
        self.heap.free(address)
    }

    /// Track host-owned memory as a root in one call
    ///
    /// # Safety
    ///
    /// `address` must stay valid for reads of `units × size` bytes while the
    /// detector is alive (typically a `static`).
    pub unsafe fn register_global_object_as_root(
        &mut self,
        address: usize,
        type_name: &str,
        units: usize,
    ) -> MldResult<()> {
        self.objects
            .register_with_origin(address, units, type_name, true, ObjectOrigin::External)?;
        Ok(())
    }

    /// Track host-owned memory without making it a root
    ///
    /// # Safety
    ///
    /// Same contract as [`LeakDetector::register_global_object_as_root`].
    pub unsafe fn register_external_object(
        &mut self,
        address: usize,
        type_name: &str,
        units: usize,
    ) -> MldResult<()> {
        self.objects
            .register_with_origin(address, units, type_name, false, ObjectOrigin::External)?;
        Ok(())
    }

    /// Promote an already tracked object to a root
    pub fn set_dynamic_object_as_root(&mut self, address: usize) -> MldResult<()> {
        self.objects.mark_root(address)
    }

    /// Run one reachability pass
    pub fn run_pass(&mut self) -> PassStats {
        let pass = self.engine.run(&mut self.objects);
        self.stats.update(pass.clone());
        pass
    }

    /// Records left unvisited by the most recent pass
    pub fn leaked_objects(&self) -> LeakReport {
        LeakReport::from_registry(&self.objects)
    }

    /// Run a pass and report what it left unvisited
    pub fn run_leak_check(&mut self) -> LeakReport {
        self.run_pass();
        let report = self.leaked_objects();
        for entry in &report {
            tracing::debug!(
                address = format_args!("{:#x}", entry.address),
                structure = %entry.type_name,
                bytes = entry.size_bytes,
                "leaked object"
            );
        }
        report
    }

    /// Whether the object containing `address` was reached by the last pass
    pub fn is_reachable(&self, address: usize) -> bool {
        self.objects
            .lookup(address)
            .map_or(false, |record| record.is_visited())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PointerTypePolicy;
    use crate::types::{DataKind, FieldDescriptor, POINTER_SIZE};

    fn detector() -> LeakDetector {
        let mut structs = StructRegistry::with_primitives();
        structs
            .register(
                "Node",
                POINTER_SIZE * 2,
                vec![
                    FieldDescriptor::pointer("next", 0, "Node"),
                    FieldDescriptor::new("value", DataKind::Int32, 4, POINTER_SIZE),
                ],
            )
            .unwrap();
        LeakDetector::new(Arc::new(structs))
    }

    #[test]
    fn test_xcalloc_tracks_zeroed_memory() {
        let mut detector = detector();
        let ptr = detector.xcalloc("Node", 3).unwrap();

        let record = detector.objects().lookup_exact(ptr.as_ptr() as usize).unwrap();
        assert_eq!(record.units(), 3);
        assert_eq!(record.origin(), ObjectOrigin::Heap);
        assert!(!record.is_root());

        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), POINTER_SIZE * 6) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(detector.heap().allocation_count(), 1);
    }

    #[test]
    fn test_xcalloc_unknown_type_allocates_nothing() {
        let mut detector = detector();
        assert!(matches!(
            detector.xcalloc("Ghost", 1),
            Err(MldError::UnknownStructureName { .. })
        ));
        assert_eq!(
            detector.xcalloc("Node", 0).unwrap_err(),
            MldError::InvalidUnitCount { units: 0 }
        );
        assert_eq!(detector.heap().allocation_count(), 0);
        assert!(detector.objects().is_empty());
    }

    #[test]
    fn test_xcalloc_respects_heap_limit() {
        let structs = detector().structs().clone();
        let options = DetectorOptions::default().with_max_heap_bytes(POINTER_SIZE * 2);
        let mut detector = LeakDetector::with_options(structs, options);

        detector.xcalloc("Node", 1).unwrap();
        assert!(matches!(
            detector.xcalloc("Node", 1),
            Err(MldError::HeapLimitExceeded { .. })
        ));
        assert_eq!(detector.objects().len(), 1);
    }

    #[test]
    fn test_xfree() {
        let mut detector = detector();
        let ptr = detector.xcalloc("Node", 1).unwrap();
        detector.xfree(ptr).unwrap();

        assert!(detector.objects().is_empty());
        assert_eq!(detector.heap().allocation_count(), 0);
        assert!(matches!(
            detector.xfree(ptr),
            Err(MldError::UnknownObject { .. })
        ));
    }

    #[test]
    fn test_xfree_rejects_external_records() {
        let mut detector = detector();
        let global = Box::new([0usize; 2]);
        let address = global.as_ptr() as usize;
        unsafe { detector.register_global_object_as_root(address, "Node", 1) }.unwrap();

        let ptr = NonNull::new(address as *mut u8).unwrap();
        assert_eq!(
            detector.xfree(ptr).unwrap_err(),
            MldError::NotHeapAllocated { address }
        );
        assert_eq!(detector.objects().len(), 1);
    }

    #[test]
    fn test_roots_and_leak_check() {
        let mut detector = detector();
        let a = detector.xcalloc("Node", 1).unwrap();
        let b = detector.xcalloc("Node", 1).unwrap();

        let report = detector.run_leak_check();
        assert_eq!(report.len(), 2);

        detector.set_dynamic_object_as_root(a.as_ptr() as usize).unwrap();
        unsafe { *(a.as_ptr() as *mut usize) = b.as_ptr() as usize };

        let report = detector.run_leak_check();
        assert!(report.is_empty());
        assert!(detector.is_reachable(b.as_ptr() as usize + 4));
        assert_eq!(detector.stats().passes, 2);
        assert_eq!(detector.stats().last.marked, 2);
    }

    #[test]
    fn test_set_root_on_untracked_address() {
        let mut detector = detector();
        assert_eq!(
            detector.set_dynamic_object_as_root(0x40).unwrap_err(),
            MldError::UnknownObject { address: 0x40 }
        );
    }

    #[test]
    fn test_options_reach_the_engine() {
        let structs = detector().structs().clone();
        let options = DetectorOptions::default().with_pointer_policy(PointerTypePolicy::Lenient);
        let detector = LeakDetector::with_options(structs, options);
        assert_eq!(detector.engine.policy(), PointerTypePolicy::Lenient);
        assert_eq!(detector.options().pointer_policy, PointerTypePolicy::Lenient);
    }
}
