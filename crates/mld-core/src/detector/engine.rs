//! Reachability engine
//!
//! Mark phase of the detector: starting from the roots, follow every pointer
//! field described by the registered layouts and mark the records they land
//! in. Uses an explicit worklist, so graph depth never grows the native stack.

use super::memory::read_pointer;
use super::PassStats;
use crate::object::ObjectRegistry;
use crate::options::PointerTypePolicy;
use crate::types::{DataKind, FieldDescriptor, StructRegistry, StructureDescriptor};
use rustc_hash::FxHashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

/// A marked record waiting to have its units scanned
struct ScanItem {
    extent: Range<usize>,
    descriptor: Arc<StructureDescriptor>,
}

/// Mark phase over an [`ObjectRegistry`]
#[derive(Default)]
pub struct ReachabilityEngine {
    policy: PointerTypePolicy,

    /// One entry per marked record not yet scanned
    worklist: Vec<ScanItem>,

    /// Structure instances pending inside the unit being scanned
    instances: Vec<(usize, Arc<StructureDescriptor>)>,

    /// `(descriptor, address)` of every instance queued for the current unit
    queued: FxHashSet<(usize, usize)>,
}

impl ReachabilityEngine {
    /// Create an engine with a pointer type policy
    pub fn new(policy: PointerTypePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Pointer type policy in use
    pub fn policy(&self) -> PointerTypePolicy {
        self.policy
    }

    /// Run one pass: reset visited flags, then mark everything reachable from the roots
    pub fn run(&mut self, objects: &mut ObjectRegistry) -> PassStats {
        let start = Instant::now();
        let structs = Arc::clone(objects.structs());
        let mut stats = PassStats::default();

        objects.reset_visited();

        let roots = objects.roots();
        stats.roots = roots.len();

        for root in roots {
            if objects.visit(root) {
                stats.marked += 1;
                self.push_object(objects, root);
                self.drain(objects, &structs, &mut stats);
            }
        }

        for record in objects.iter().filter(|record| !record.is_visited()) {
            stats.leaked_objects += 1;
            stats.leaked_bytes += record.size_bytes();
        }

        stats.pause_time = start.elapsed();
        tracing::info!(
            roots = stats.roots,
            marked = stats.marked,
            leaked = stats.leaked_objects,
            leaked_bytes = stats.leaked_bytes,
            "reachability pass complete"
        );
        stats
    }

    /// Queue the record at `base` for scanning
    fn push_object(&mut self, objects: &ObjectRegistry, base: usize) {
        let Some(record) = objects.lookup_exact(base) else {
            return;
        };
        if !record.descriptor().has_pointers() {
            return;
        }
        self.worklist.push(ScanItem {
            extent: record.extent(),
            descriptor: Arc::clone(record.descriptor()),
        });
    }

    fn drain(
        &mut self,
        objects: &mut ObjectRegistry,
        structs: &StructRegistry,
        stats: &mut PassStats,
    ) {
        while let Some(item) = self.worklist.pop() {
            let step = item.descriptor.size();
            let mut unit = item.extent.start;
            while unit < item.extent.end {
                self.scan_unit(&item, unit, objects, structs, stats);
                unit += step;
            }
        }
    }

    /// Scan one unit of a record, embedded structures included
    fn scan_unit(
        &mut self,
        item: &ScanItem,
        unit: usize,
        objects: &mut ObjectRegistry,
        structs: &StructRegistry,
        stats: &mut PassStats,
    ) {
        self.queued.clear();
        self.queued.insert(instance_key(&item.descriptor, unit));
        self.instances.push((unit, Arc::clone(&item.descriptor)));

        while let Some((base, descriptor)) = self.instances.pop() {
            // Reverse so fields pop in declaration order
            for field in descriptor.fields().iter().rev() {
                match field.kind {
                    DataKind::ObjStruct => self.push_embedded(&descriptor, base, field, structs),
                    DataKind::ObjPtr | DataKind::VoidPtr => {
                        let Some(value) = read_pointer(&item.extent, base + field.offset) else {
                            continue;
                        };
                        self.follow(objects, field, value, stats);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Queue every element of an embedded structure field
    ///
    /// An instance already queued for the current unit is not queued again,
    /// which bounds the work for layouts that embed themselves.
    fn push_embedded(
        &mut self,
        owner: &StructureDescriptor,
        base: usize,
        field: &FieldDescriptor,
        structs: &StructRegistry,
    ) {
        let nested_name = field.nested_type.as_deref().unwrap_or_default();
        let Some(nested) = structs.lookup(nested_name) else {
            tracing::warn!(
                structure = owner.name(),
                field = %field.name,
                nested = nested_name,
                "embedded structure is not registered, skipping"
            );
            return;
        };
        let element_size = nested.size();
        if element_size > field.size || field.size % element_size != 0 {
            tracing::warn!(
                structure = owner.name(),
                field = %field.name,
                nested = nested_name,
                field_size = field.size,
                element_size,
                "embedded field is not a whole number of structures, skipping"
            );
            return;
        }
        if !nested.has_pointers() {
            return;
        }

        let start = base + field.offset;
        for element in (0..field.size / element_size).rev() {
            let address = start + element * element_size;
            if self.queued.insert(instance_key(nested, address)) {
                self.instances.push((address, Arc::clone(nested)));
            } else {
                tracing::trace!(
                    structure = owner.name(),
                    field = %field.name,
                    address = format_args!("{:#x}", address),
                    "embedded instance already queued"
                );
            }
        }
    }

    fn follow(
        &mut self,
        objects: &mut ObjectRegistry,
        field: &FieldDescriptor,
        value: usize,
        stats: &mut PassStats,
    ) {
        if value == 0 {
            stats.null_pointers += 1;
            return;
        }

        let Some(target) = objects.lookup(value) else {
            stats.unresolved_pointers += 1;
            tracing::trace!(
                field = %field.name,
                value = format_args!("{:#x}", value),
                "pointer outside tracked objects"
            );
            return;
        };

        if field.kind == DataKind::ObjPtr
            && self.policy == PointerTypePolicy::Strict
            && field.nested_type.as_deref() != Some(target.type_name())
        {
            stats.type_mismatches += 1;
            tracing::debug!(
                field = %field.name,
                declared = field.nested_type.as_deref().unwrap_or_default(),
                actual = target.type_name(),
                value = format_args!("{:#x}", value),
                "pointer type mismatch, not following"
            );
            return;
        }

        stats.pointers_followed += 1;
        let base = target.address();
        if objects.visit(base) {
            stats.marked += 1;
            tracing::trace!(
                field = %field.name,
                target = format_args!("{:#x}", base),
                "marked"
            );
            self.push_object(objects, base);
        }
    }
}

fn instance_key(descriptor: &Arc<StructureDescriptor>, address: usize) -> (usize, usize) {
    (Arc::as_ptr(descriptor) as usize, address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::POINTER_SIZE;

    #[repr(C)]
    struct Node {
        next: *mut Node,
        value: i32,
    }

    fn node_registry() -> Arc<StructRegistry> {
        let mut structs = StructRegistry::with_primitives();
        structs
            .register(
                "Node",
                std::mem::size_of::<Node>(),
                vec![
                    FieldDescriptor::pointer("next", 0, "Node"),
                    FieldDescriptor::new("value", DataKind::Int32, 4, POINTER_SIZE),
                ],
            )
            .unwrap();
        Arc::new(structs)
    }

    fn node(next: *mut Node) -> Box<Node> {
        Box::new(Node { next, value: 0 })
    }

    fn addr(node: &Node) -> usize {
        node as *const Node as usize
    }

    #[test]
    fn test_chain_is_reachable() {
        let mut c = node(std::ptr::null_mut());
        let mut b = node(&mut *c);
        let a = node(&mut *b);

        let mut objects = ObjectRegistry::new(node_registry());
        unsafe {
            objects.register(addr(&a), 1, "Node", true).unwrap();
            objects.register(addr(&b), 1, "Node", false).unwrap();
            objects.register(addr(&c), 1, "Node", false).unwrap();
        }

        let stats = ReachabilityEngine::default().run(&mut objects);
        assert_eq!(stats.roots, 1);
        assert_eq!(stats.marked, 3);
        assert_eq!(stats.leaked_objects, 0);
        assert_eq!(stats.null_pointers, 1);
        assert!(objects.iter().all(|r| r.is_visited()));
    }

    #[test]
    fn test_unreferenced_object_leaks() {
        let a = node(std::ptr::null_mut());
        let d = node(std::ptr::null_mut());

        let mut objects = ObjectRegistry::new(node_registry());
        unsafe {
            objects.register(addr(&a), 1, "Node", true).unwrap();
            objects.register(addr(&d), 1, "Node", false).unwrap();
        }

        let stats = ReachabilityEngine::default().run(&mut objects);
        assert_eq!(stats.leaked_objects, 1);
        assert_eq!(stats.leaked_bytes, std::mem::size_of::<Node>());
        assert!(!objects.lookup_exact(addr(&d)).unwrap().is_visited());
    }

    #[test]
    fn test_self_cycle_terminates() {
        let mut a = node(std::ptr::null_mut());
        let self_ptr: *mut Node = &mut *a;
        a.next = self_ptr;

        let mut objects = ObjectRegistry::new(node_registry());
        unsafe { objects.register(addr(&a), 1, "Node", true) }.unwrap();

        let stats = ReachabilityEngine::default().run(&mut objects);
        assert_eq!(stats.marked, 1);
        assert_eq!(stats.pointers_followed, 1);
    }

    #[test]
    fn test_untracked_pointer_skipped() {
        let mut stranger = node(std::ptr::null_mut());
        let a = node(&mut *stranger);

        let mut objects = ObjectRegistry::new(node_registry());
        unsafe { objects.register(addr(&a), 1, "Node", true) }.unwrap();

        let stats = ReachabilityEngine::default().run(&mut objects);
        assert_eq!(stats.unresolved_pointers, 1);
        assert_eq!(stats.marked, 1);
    }

    #[test]
    fn test_no_roots_marks_nothing() {
        let a = node(std::ptr::null_mut());
        let mut objects = ObjectRegistry::new(node_registry());
        unsafe { objects.register(addr(&a), 1, "Node", false) }.unwrap();

        let stats = ReachabilityEngine::new(PointerTypePolicy::Lenient).run(&mut objects);
        assert_eq!(stats.roots, 0);
        assert_eq!(stats.marked, 0);
        assert_eq!(stats.leaked_objects, 1);
    }

    #[test]
    fn test_self_embedding_descriptor_terminates() {
        // "Loop" claims to embed itself twice at offset 0, next to padding types
        let mut structs = StructRegistry::with_primitives();
        for i in 0..14 {
            structs
                .register(&format!("Pad{}", i), 4, Vec::new())
                .unwrap();
        }
        structs
            .register(
                "Loop",
                POINTER_SIZE * 2,
                vec![
                    FieldDescriptor::embedded("a", 0, POINTER_SIZE * 2, "Loop"),
                    FieldDescriptor::embedded("b", 0, POINTER_SIZE * 2, "Loop"),
                    FieldDescriptor::raw_pointer("next", POINTER_SIZE),
                ],
            )
            .unwrap();

        let target = node(std::ptr::null_mut());
        let words = Box::new([0usize, addr(&target)]);
        let mut objects = ObjectRegistry::new(Arc::new(structs));
        unsafe {
            objects.register(words.as_ptr() as usize, 1, "Loop", true).unwrap();
            objects.register(addr(&target), 1, "Node", false).unwrap();
        }

        let mut engine = ReachabilityEngine::default();
        let stats = engine.run(&mut objects);
        assert_eq!(stats.marked, 2);
        assert_eq!(stats.pointers_followed, 1);
        assert!(engine.instances.is_empty());
    }

    #[test]
    fn test_array_record_queues_a_single_item() {
        let mut objects = ObjectRegistry::new(node_registry());
        let nodes: Vec<Node> = (0..1000)
            .map(|_| Node {
                next: std::ptr::null_mut(),
                value: 0,
            })
            .collect();
        unsafe { objects.register(nodes.as_ptr() as usize, nodes.len(), "Node", true) }.unwrap();

        let mut engine = ReachabilityEngine::default();
        engine.push_object(&objects, nodes.as_ptr() as usize);
        assert_eq!(engine.worklist.len(), 1);
        engine.worklist.clear();

        let stats = engine.run(&mut objects);
        assert_eq!(stats.marked, 1);
        assert_eq!(stats.null_pointers, nodes.len());
        assert!(engine.worklist.is_empty());
    }
}
