//! Conflict detection, resolution, and tree merging.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- pairing local and remote changes to the same identity.
//! 2. **Resolution** -- settling each pair by strategy, or flagging it for a human.
//! 3. **Merging** -- applying remote changes and resolutions onto the local tree.

pub mod detector;
pub mod merger;
pub mod resolver;

pub use detector::{ConflictDetector, ConflictKind, ConflictPair, Detection, Side};
pub use merger::Merger;
pub use resolver::{ConflictResolver, DeleteResolution, Resolution, ResolutionStrategy, SyncConflict};
