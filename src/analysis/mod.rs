//! Flow reconstruction algorithms.
//!
//! This module turns the reader's linear instruction stream into
//! per-function control-flow graphs: function discovery from call sites,
//! worklist-based block exploration and the refinement passes.

pub mod cfg;
