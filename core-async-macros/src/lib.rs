//! Attribute macros for async entry points.
//!
//! `#[core_async::test]` and `#[core_async::main]` turn an `async fn` into a
//! synchronous one whose body runs under
//! `core_async::runtime::block_on_local`, so it may spawn `!Send` local
//! tasks.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{ItemFn, Result};

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    finish(entry_point(attr.into(), item.into(), true))
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    finish(entry_point(attr.into(), item.into(), false))
}

fn finish(expanded: Result<TokenStream2>) -> TokenStream {
    expanded
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn entry_point(attr: TokenStream2, item: TokenStream2, is_test: bool) -> Result<TokenStream2> {
    if !attr.is_empty() {
        return Err(syn::Error::new_spanned(
            attr,
            "core_async entry points take no arguments",
        ));
    }

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = syn::parse2(item)?;

    if sig.asyncness.take().is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "expected an `async fn`",
        ));
    }
    if is_test && !sig.inputs.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "test functions take no parameters",
        ));
    }

    let marker = is_test.then(|| quote!(#[::core::prelude::v1::test]));
    Ok(quote! {
        #marker
        #(#attrs)*
        #vis #sig {
            ::core_async::runtime::block_on_local(async move #block)
        }
    })
}
