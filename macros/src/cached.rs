use syn::parse::{Parse, ParseStream};

use super::*;
use crate::utils::{parse_flag, parse_key_value};

mod kw {
    syn::custom_keyword!(name);
    syn::custom_keyword!(key);
    syn::custom_keyword!(do_pickle);
}

/// The options of `#[cached_function]`.
#[derive(Default)]
pub struct Options {
    name: Option<syn::LitStr>,
    key: Option<syn::Path>,
    do_pickle: bool,
}

impl Parse for Options {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut options = Options::default();
        while !input.is_empty() {
            if let Some(name) = parse_key_value::<kw::name, syn::LitStr>(input)? {
                options.name = Some(name);
            } else if let Some(key) = parse_key_value::<kw::key, syn::Path>(input)? {
                options.key = Some(key);
            } else if parse_flag::<kw::do_pickle>(input)? {
                options.do_pickle = true;
            } else {
                return Err(input.error("cachefunc: expected `name`, `key` or `do_pickle`"));
            }
        }
        Ok(options)
    }
}

/// Memoize a function.
pub fn expand(options: Options, mut func: syn::ItemFn) -> Result<proc_macro2::TokenStream> {
    if let Some(asyncness) = &func.sig.asyncness {
        bail!(asyncness, "async functions are not supported");
    }
    if !func.sig.generics.params.is_empty() {
        bail!(func.sig.generics, "generic functions are not supported");
    }

    let mut args = vec![];
    let mut types = vec![];
    for input in &func.sig.inputs {
        let typed = match input {
            syn::FnArg::Typed(typed) => typed,
            syn::FnArg::Receiver(_) => {
                bail!(input, "methods are not supported")
            }
        };

        let name = match typed.pat.as_ref() {
            syn::Pat::Ident(syn::PatIdent {
                by_ref: None,
                mutability: None,
                ident,
                subpat: None,
                ..
            }) => ident.clone(),
            pat => bail!(pat, "only simple identifiers are supported"),
        };

        args.push(name);
        types.push(typed.ty.as_ref().clone());
    }

    let output: syn::Type = match &func.sig.output {
        syn::ReturnType::Default => parse_quote! { () },
        syn::ReturnType::Type(_, ty) => ty.as_ref().clone(),
    };

    let ident = &func.sig.ident;
    let name = options
        .name
        .unwrap_or_else(|| syn::LitStr::new(&ident.to_string(), ident.span()));
    let accessor = quote::format_ident!("{}_cache", ident);
    let vis = &func.vis;

    // Declare every argument as a parameter.
    let params = args.iter().map(|arg| {
        let param = arg.to_string();
        quote! { .param(#param) }
    });

    let key = options.key.map(|key| quote! { .key(#key) });
    let do_pickle = options.do_pickle.then(|| quote! { .do_pickle(true) });

    // Extract the canonical arguments in declaration order.
    let indices = 0..args.len();
    let extract = quote! {
        #(let #args: #types = __args.extract(#indices)?;)*
    };

    // Construct the inner closure.
    let body = &func.block;
    let closure = quote! { move || -> #output #body };

    let accessor_fn = quote! {
        /// The cache backing the memoized function.
        #vis fn #accessor() -> &'static ::cachefunc::FunctionCache<#output> {
            static CACHE: ::cachefunc::internal::Lazy<::cachefunc::FunctionCache<#output>> =
                ::cachefunc::internal::Lazy::new(|| {
                    ::cachefunc::cached::<#output>(#name)
                        .owner(::core::module_path!())
                        .signature(::cachefunc::Signature::new() #(#params)*)
                        #key
                        #do_pickle
                        .function(|__args: &::cachefunc::Args| {
                            #extract
                            ::core::result::Result::Ok((#closure)())
                        })
                });
            static REGISTER: ::std::sync::Once = ::std::sync::Once::new();
            REGISTER.call_once(|| CACHE.register());
            &CACHE
        }
    };

    // Adjust the function's body.
    func.block = parse_quote! { {
        let __args = ::cachefunc::Args::new() #(.arg(#args))*;
        match #accessor().call(&__args) {
            ::core::result::Result::Ok(output) => output,
            ::core::result::Result::Err(err) => {
                ::core::panic!("cachefunc: {}: {}", #name, err)
            }
        }
    } };

    Ok(quote! {
        #accessor_fn
        #func
    })
}
