//! Memoization of functions and methods.
//!
//! Calls are normalized into keys, so that positional, keyword and defaulted
//! spellings of the same call share one cache entry. Results can be kept in
//! memory, held weakly, stored per instance, shared through a parent object
//! or persisted on disk. Caches built with `do_pickle` keep their contents
//! when they, or the instance holding them, are serialized.
//!
//! ```
//! use cachefunc::{args, cached, Signature};
//!
//! let fib = cached("fib")
//!     .signature(Signature::new().param("n"))
//!     .function(|args| {
//!         let n: u64 = args.extract(0)?;
//!         Ok((1..=n).fold((0u64, 1u64), |(a, b), _| (b, a + b)).0)
//!     });
//!
//! assert_eq!(fib.call(&args![10]).unwrap(), 55);
//! assert!(fib.is_in_cache(&args![; n = 10]).unwrap());
//! ```

mod args;
mod bridge;
mod builder;
mod cache;
mod disk;
mod error;
mod function;
mod instance;
mod key;
mod method;
mod noargs;
mod parent;
mod passthroughhasher;
pub mod registry;
mod special;
mod value;
mod weak;

#[cfg(feature = "testing")]
pub mod testing;

pub use crate::args::{Args, Signature};
pub use crate::bridge::{Codec, Placeholder, Snapshot};
pub use crate::builder::{cached, Builder};
pub use crate::cache::{CacheMap, Store};
pub use crate::disk::{DiskCachedFunction, FileCache};
pub use crate::error::{BoxError, Error, Result};
pub use crate::function::{Func, FunctionCache};
pub use crate::instance::{Caller, Child, Instance, Storage};
pub use crate::key::{Key, KeyFn, KeyNormalizer, KeyRepr};
pub use crate::method::{CachedMethod, CachedMethodCaller, MethodFn};
pub use crate::noargs::{CachedMethodCallerNoArgs, CachedMethodNoArgs, NoArgsFn};
pub use crate::parent::CachedInParentMethod;
pub use crate::registry::{reconstruct, Reduced};
pub use crate::special::CachedSpecialMethod;
pub use crate::value::{Atom, FromValue, Object, Value};
pub use crate::weak::{WeakFunctionCache, WeakStore, DEFAULT_WEAK_CAPACITY};

#[cfg(feature = "macros")]
pub use cachefunc_macros::cached_function;

/// These are implementation details. Do not rely on them!
#[doc(hidden)]
pub mod internal {
    pub use once_cell::sync::Lazy;
}
