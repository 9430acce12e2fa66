//! Sea-of-Nodes Intermediate Representation.
//!
//! This module provides the IR the escape analysis runs on:
//!
//! # Core Components
//!
//! - **Types** (`types.rs`): value kinds and the class/array type registry
//! - **Operators** (`operators.rs`): operator definitions
//! - **Arena** (`arena.rs`): generation-checked node storage
//! - **Node** (`node.rs`): IR node definitions
//! - **Graph** (`graph.rs`): Sea-of-Nodes graph structure
//! - **CFG** (`cfg.rs`): control flow graph, dominators and loops
//! - **Schedule** (`schedule.rs`): per-block order of fixed and floating nodes
//! - **Block iterator** (`block_iterator.rs`): forward traversal with
//!   per-path state
//! - **Builder** (`builder/`): structured graph construction
//!
//! # Design Principles
//!
//! - **Arena allocation**: O(1) node creation, stale handles detected
//! - **Use-def chains**: fast optimization passes
//! - **Unified control/data**: fixed nodes form the control chain, all other
//!   values float and are placed by the scheduler

pub mod arena;
pub mod block_iterator;
pub mod builder;
pub mod cfg;
pub mod graph;
pub mod node;
pub mod operators;
pub mod schedule;
pub mod types;

// Re-export commonly used types
pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use block_iterator::{BlockClosure, BlockIterator};
pub use builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder, ObjectBuilder};
pub use cfg::{BasicBlock, BlockId, Cfg, DominatorTree, Loop, LoopAnalysis};
pub use graph::Graph;
pub use node::{InputList, Node, NodeFlags, NodeId};
pub use operators::{ArithOp, CmpOp, ControlOp, MemoryOp, MonitorOp, Operator, VirtualOp};
pub use schedule::Schedule;
pub use types::{FieldId, TypeId, TypeRegistry, ValueKind};
