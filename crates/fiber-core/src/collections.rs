#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use hashbrown::{HashMap, HashSet};
}

/// Insertion-ordered map used where iteration order is observable
/// (existing children during reconciliation, element attributes).
pub type OrderedMap<K, V> = indexmap::IndexMap<K, V, crate::hash::BuildDefaultHasher>;
