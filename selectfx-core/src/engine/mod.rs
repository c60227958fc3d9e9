//! Reconciliation Engine
//!
//! This module turns collected effect requests into started and stopped
//! effects.
//!
//! # Overview
//!
//! - The [`EffectRegistry`] is the live table of effect instances, one entry
//!   per key, each with a state, a reference count and a teardown.
//! - [`KeyDiff`] compares a cycle's requested keys against that table.
//! - The [`CycleScheduler`] accumulates requests across every selector
//!   evaluation in a cycle and commits them to the registry exactly once.
//!
//! # Phases
//!
//! Collection happens during the render phase and only records intent.
//! Starting and stopping happen in the commit phase, after the host signals
//! that the cycle is complete. Keeping the two apart means a selector
//! evaluation is always a pure read, even if the host throws it away.

mod diff;
mod entry;
mod registry;
mod scheduler;

pub use diff::{classify, DescriptorChange, KeyDiff};
pub use entry::EntryState;
pub use registry::{CommitReport, CycleDemand, Demand, EffectRegistry};
pub use scheduler::CycleScheduler;
