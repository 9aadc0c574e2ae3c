extern crate proc_macro;

macro_rules! bail {
    ($item:expr, $fmt:literal $($tts:tt)*) => {
        return Err(Error::new_spanned(
            &$item,
            format!(concat!("cachefunc: ", $fmt) $($tts)*)
        ))
    }
}

mod cached;
mod utils;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_quote, Error, Result};

/// Memoize a free function.
///
/// The function is backed by a static `FunctionCache`, reachable through a
/// generated `<function>_cache()` accessor and registered for
/// reconstruction under `module_path!()` and its name. Arguments must be
/// simple identifiers whose types convert into and out of `Value`.
///
/// Options:
/// - `name = "..."`: the cache name, defaults to the function name.
/// - `key = path`: a custom key function `fn(&Args) -> Result<Value>`.
/// - `do_pickle`: keep the entries when the cache is serialized.
///
/// # Panics
/// The generated function returns the plain output type, so it panics when
/// the call cannot be cached. This happens when an argument is unhashable or
/// when the custom key function fails. Use the accessor's `call` to get the
/// error instead.
///
/// ```
/// # use cachefunc::cached_function;
/// #[cached_function(do_pickle)]
/// fn collatz(n: u64) -> u64 {
///     match n {
///         1 => 0,
///         n if n % 2 == 0 => 1 + collatz(n / 2),
///         n => 1 + collatz(3 * n + 1),
///     }
/// }
///
/// assert_eq!(collatz(27), 111);
/// assert!(collatz_cache().cache().len() > 100);
/// ```
#[proc_macro_attribute]
pub fn cached_function(attr: TokenStream, stream: TokenStream) -> TokenStream {
    let options = syn::parse_macro_input!(attr as cached::Options);
    let func = syn::parse_macro_input!(stream as syn::ItemFn);
    cached::expand(options, func)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
