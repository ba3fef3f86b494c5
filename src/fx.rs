//! Fast, non-DoS-resistant hash map/set aliases for compiler-internal use,
//! exactly cranelift-codegen's own `src/fx.rs`: every map keyed by something
//! other than a dense entity ref (which already gets `SecondaryMap`'s O(1)
//! indexing) goes through these instead of the default SipHash-keyed
//! `std::collections::HashMap`.

pub use rustc_hash::{FxHashMap, FxHashSet};
