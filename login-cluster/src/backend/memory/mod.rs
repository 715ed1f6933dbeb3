//! In-process cluster grid.
//!
//! Every [`MemoryNode`] joined to the same [`MemoryGrid`] shares its maps and
//! queues, so cross-node semantics (one winner per dedup key, one consumer
//! per item) hold exactly as they would on a replicated store. Nodes can be
//! shut down, cut off from the network, evicted or made to fail probes, and
//! each of those emits the lifecycle/membership events a real runtime would.

pub mod grid;
pub mod node;
pub mod structures;

pub use grid::MemoryGrid;
pub use node::MemoryNode;
pub use structures::{MemoryMap, MemoryQueue};
