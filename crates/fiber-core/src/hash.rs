use std::hash::BuildHasherDefault;

#[cfg(feature = "std-hash")]
pub mod default {
    pub use std::collections::hash_map::DefaultHasher;
}

#[cfg(not(feature = "std-hash"))]
pub mod default {
    pub use ahash::AHasher as DefaultHasher;
}

/// Hasher builder for the ordered maps, following whichever default is active.
pub type BuildDefaultHasher = BuildHasherDefault<default::DefaultHasher>;
