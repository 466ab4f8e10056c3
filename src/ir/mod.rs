//! The intermediate representation.
//!
//! Everything a transformation reads or writes about the program:
//!
//! - [`pool`]: interned strings, types, prototypes, field and method references;
//! - [`opcode`] and [`instruction`]: the register-based instruction set;
//! - [`entry`] and [`position`]: the items of a linear body besides instructions
//!   (try markers, catches, positions, source blocks, labels, debug entries);
//! - [`code`]: a method body, switching between linear and [`crate::cfg`] form;
//! - [`encoding`]: the container-format encoding limits of instructions;
//! - [`class`], [`scope`] and [`hierarchy`]: class definitions, the whole-program
//!   scope and hierarchy queries over it;
//! - [`builder`] and [`printer`]: constructing and printing bodies.
//!
//! # Example
//!
//! ```rust
//! use dexopt::ir::{builder::CodeBuilder, instruction::IrInstruction, opcode::IrOpcode, Pool};
//!
//! let pool = Pool::new();
//! let mut code = CodeBuilder::new(1)
//!     .insn(IrInstruction::const_(0, 42))
//!     .insn(IrInstruction::new(IrOpcode::Return).with_srcs(&[0]))
//!     .build();
//! code.build_cfg(&pool)?;
//! assert_eq!(code.cfg().map(|cfg| cfg.num_blocks()), Some(1));
//! # Ok::<(), dexopt::Error>(())
//! ```

pub mod builder;
pub mod class;
pub mod code;
pub mod encoding;
pub mod entry;
pub mod hierarchy;
pub mod instruction;
pub mod opcode;
pub mod pool;
pub mod position;
pub mod printer;
pub mod scope;
pub mod types;

pub use class::{AccessFlags, DexClass, DexField, DexMethod};
pub use code::IrCode;
pub use hierarchy::TypeSystem;
pub use pool::{
    CallSiteRef, FieldRef, KnownTypes, MethodHandleRef, MethodRef, Pool, ProtoRef, StringRef,
    TypeRef,
};
pub use scope::{ClassId, DexStore, MethodId, Scope};
