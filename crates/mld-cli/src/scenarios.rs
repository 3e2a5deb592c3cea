//! Built-in host programs
//!
//! Each scenario registers its structures, allocates through the detector,
//! links objects by writing host pointers, and declares roots.

use anyhow::{Context, Result};
use clap::ValueEnum;
use mld_core::{DataKind, DetectorOptions, LeakDetector, StructRegistry, StructureBuilder};
use std::mem::{offset_of, size_of};
use std::ptr::NonNull;
use std::sync::Arc;

#[repr(C)]
struct Node {
    next: *mut Node,
    value: i32,
}

#[repr(C)]
struct Emp {
    emp_name: [u8; 30],
    emp_id: u32,
    age: u32,
    mgr: *mut Emp,
    salary: f32,
    p: *mut i32,
}

#[repr(C)]
struct Student {
    stud_name: [u8; 32],
    rollno: u32,
    age: u32,
    aggregate: f32,
    best_colleague: *mut Student,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// A -> B -> C rooted at A
    List,
    /// The list plus one unreferenced node
    Orphan,
    /// Two nodes pointing at each other, neither reachable from a root
    Cycle,
    /// Employee and student records with one forgotten employee
    School,
    /// A `Node*` field pointing at an object of another type
    Mistyped,
}

impl Scenario {
    pub fn all() -> &'static [Scenario] {
        &[
            Scenario::List,
            Scenario::Orphan,
            Scenario::Cycle,
            Scenario::School,
            Scenario::Mistyped,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Scenario::List => "list",
            Scenario::Orphan => "orphan",
            Scenario::Cycle => "cycle",
            Scenario::School => "school",
            Scenario::Mistyped => "mistyped",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Scenario::List => "linked list fully reachable from its head",
            Scenario::Orphan => "linked list plus one node nobody points to",
            Scenario::Cycle => "unrooted two-node cycle next to a rooted node",
            Scenario::School => "employee/student database with a forgotten employee",
            Scenario::Mistyped => "Node* field aimed at an Other object (policy dependent)",
        }
    }

    /// Register structures, allocate and link objects, declare roots
    pub fn build(self, options: DetectorOptions) -> Result<LeakDetector> {
        let structs = Arc::new(register_structs().context("registering structures")?);
        let mut detector = LeakDetector::with_options(structs, options);
        match self {
            Scenario::List => {
                linked_list(&mut detector)?;
            }
            Scenario::Orphan => {
                linked_list(&mut detector)?;
                detector.xcalloc("Node", 1)?;
            }
            Scenario::Cycle => cycle(&mut detector)?,
            Scenario::School => school(&mut detector)?,
            Scenario::Mistyped => mistyped(&mut detector)?,
        }
        Ok(detector)
    }
}

fn register_structs() -> mld_core::MldResult<StructRegistry> {
    let mut structs = StructRegistry::with_primitives();

    StructureBuilder::new("Node", size_of::<Node>())
        .pointer("next", offset_of!(Node, next), "Node")
        .int32("value", offset_of!(Node, value))
        .register(&mut structs)?;

    StructureBuilder::new("emp_t", size_of::<Emp>())
        .chars("emp_name", offset_of!(Emp, emp_name), 30)
        .uint32("emp_id", offset_of!(Emp, emp_id))
        .uint32("age", offset_of!(Emp, age))
        .pointer("mgr", offset_of!(Emp, mgr), "emp_t")
        .float("salary", offset_of!(Emp, salary))
        .pointer("p", offset_of!(Emp, p), "int")
        .register(&mut structs)?;

    StructureBuilder::new("student_t", size_of::<Student>())
        .chars("stud_name", offset_of!(Student, stud_name), 32)
        .uint32("rollno", offset_of!(Student, rollno))
        .uint32("age", offset_of!(Student, age))
        .float("aggregate", offset_of!(Student, aggregate))
        .pointer(
            "best_colleague",
            offset_of!(Student, best_colleague),
            "student_t",
        )
        .register(&mut structs)?;

    StructureBuilder::new("Other", 32)
        .array("payload", DataKind::UInt8, 0, 32)
        .register(&mut structs)?;

    Ok(structs)
}

fn node(ptr: NonNull<u8>) -> *mut Node {
    ptr.as_ptr() as *mut Node
}

fn linked_list(detector: &mut LeakDetector) -> Result<()> {
    let a = node(detector.xcalloc("Node", 1)?);
    let b = node(detector.xcalloc("Node", 1)?);
    let c = node(detector.xcalloc("Node", 1)?);
    unsafe {
        (*a).next = b;
        (*a).value = 1;
        (*b).next = c;
        (*b).value = 2;
        (*c).value = 3;
    }
    detector.set_dynamic_object_as_root(a as usize)?;
    Ok(())
}

fn cycle(detector: &mut LeakDetector) -> Result<()> {
    let x = node(detector.xcalloc("Node", 1)?);
    let y = node(detector.xcalloc("Node", 1)?);
    let anchor = node(detector.xcalloc("Node", 1)?);
    unsafe {
        (*x).next = y;
        (*y).next = x;
    }
    detector.set_dynamic_object_as_root(anchor as usize)?;
    Ok(())
}

fn copy_name(dst: &mut [u8], name: &str) {
    let len = name.len().min(dst.len() - 1);
    dst[..len].copy_from_slice(&name.as_bytes()[..len]);
}

fn school(detector: &mut LeakDetector) -> Result<()> {
    let abhishek = detector.xcalloc("student_t", 1)?.as_ptr() as *mut Student;
    let shivani = detector.xcalloc("student_t", 1)?.as_ptr() as *mut Student;
    let joseph = detector.xcalloc("emp_t", 2)?.as_ptr() as *mut Emp;
    let salaries = detector.xcalloc("int", 12)?.as_ptr() as *mut i32;

    unsafe {
        copy_name(&mut (*abhishek).stud_name, "Abhishek");
        (*abhishek).rollno = 10;
        (*abhishek).age = 20;
        (*abhishek).best_colleague = shivani;

        copy_name(&mut (*shivani).stud_name, "Shivani");
        (*shivani).rollno = 11;
        (*shivani).aggregate = 87.5;

        copy_name(&mut (*joseph).emp_name, "Joseph");
        (*joseph).emp_id = 7;
        (*joseph).salary = 4200.0;
        (*joseph).mgr = joseph.add(1);
        (*joseph).p = salaries;
    }

    detector.set_dynamic_object_as_root(abhishek as usize)?;
    Ok(())
}

fn mistyped(detector: &mut LeakDetector) -> Result<()> {
    let holder = node(detector.xcalloc("Node", 1)?);
    let other = detector.xcalloc("Other", 1)?;
    unsafe { (*holder).next = other.as_ptr() as *mut Node };
    detector.set_dynamic_object_as_root(holder as usize)?;
    Ok(())
}
