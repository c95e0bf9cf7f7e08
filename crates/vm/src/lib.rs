//! # MSL Virtual Machine
//!
//! A bytecode virtual machine for the MSL scripting language: the loader,
//! interpreter, object model and memory manager behind the language's
//! multi-stage toolchain.
//!
//! ## Architecture
//!
//! The VM is organized into several core components:
//!
//! - **VirtualMachine**: fetch-decode-execute loop, call stack, object stack
//!   and the ALU
//! - **AssemblyLoader**: streaming deserializer from bytecode to the
//!   in-memory class and method tables
//! - **GarbageCollector**: mark-and-sweep collector fronted by per-type slab
//!   allocators
//! - **Object model**: tagged runtime values addressed through [`ObjectRef`]
//!   handles
//! - **System namespace**: native Console/Reflection/Array/Math/GC classes
//! - **AssemblyBuilder**: programmatic emitter of the bytecode grammar
//!
//! ## Example
//!
//! ```rust,no_run
//! use msl_vm::{
//!     AssemblyBuilder, ClassBuilder, ClassModifiers, Configuration, MethodBuilder,
//!     MethodModifiers, NamespaceBuilder, OpCode, VirtualMachine,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // return 2 + 3;
//! let mut main = MethodBuilder::new(
//!     "Main",
//!     MethodModifiers::STATIC | MethodModifiers::PUBLIC | MethodModifiers::ENTRY_POINT,
//! );
//! main.push_integer("2");
//! main.push_integer("3");
//! main.emit(OpCode::SumOp);
//! main.emit(OpCode::PopToReturn);
//!
//! let bytes = AssemblyBuilder::new()
//!     .namespace(
//!         NamespaceBuilder::new("Main")
//!             .friend("System")
//!             .class(ClassBuilder::new("Program", ClassModifiers::STATIC).method(main)),
//!     )
//!     .to_bytes();
//!
//! let mut vm = VirtualMachine::new(Configuration::default());
//! vm.load_assembly(&bytes[..])?;
//! let status = vm.run();
//! assert!(status.success());
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

/// Programmatic emitter of the bytecode assembly grammar
pub mod assembly_builder;
/// Arbitrary-precision integers with explicit infinity
pub mod big_int;
/// VM configuration and stream ownership
pub mod config;
/// Error word and structured error types
pub mod error;
/// Per-call execution state
pub mod frame;
/// Mark-and-sweep garbage collector over slab pools
pub mod gc;
/// Streaming bytecode deserializer
pub mod loader;
/// Tagged runtime value model
pub mod object;
/// Opcode definitions
pub mod op_code;
/// Grammar primitive decoding
pub mod reader;
/// Fixed-object-size slab allocators
pub mod slab;
/// The built-in System namespace
pub mod system;
/// Static metadata of loaded assemblies
pub mod types;
/// The interpreter itself
pub mod vm;

pub use assembly_builder::{
    serialize_assembly, AssemblyBuilder, ClassBuilder, MethodBuilder, NamespaceBuilder,
};
pub use big_int::MslInt;
pub use config::{Configuration, ExecutionConfig, GcConfig, Streams};
pub use error::{ErrorFlags, LoaderError, VmError, VmResult};
pub use frame::{CallPath, Frame};
pub use gc::{GarbageCollector, GcStats};
pub use loader::{AssemblyLoader, LoadedAssembly};
pub use object::{GcState, Local, LocalSlot, ObjectRef, TypeTag};
pub use op_code::OpCode;
pub use slab::SlabAllocator;
pub use types::{
    Assembly, AttributeModifiers, AttributeType, ClassId, ClassModifiers, ClassType,
    MethodModifiers, MethodType, NamespaceId, NamespaceType,
};
pub use vm::{ExitStatus, VirtualMachine};
