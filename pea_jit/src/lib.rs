//! Partial escape analysis for a Sea-of-Nodes JIT IR.
//!
//! Components:
//! - Sea-of-Nodes IR with CFG, schedule and a forward block iterator
//! - Partial escape analysis that removes allocations, loads, stores and
//!   locks of objects that do not escape, materializing them where they do
//! - Cleanup passes and a pass pipeline
//! - A reference interpreter for differential testing of optimized graphs
#![deny(unsafe_op_in_unsafe_fn)]
pub mod error;
pub mod interp;
pub mod ir;
pub mod opt;

pub use error::{Bailout, InterpError, PeaError, PeaResult};
