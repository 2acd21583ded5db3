//! `#[derive(ExpandEnv)]` for dbmagic configuration structs.
//!
//! The generated impl visits every field in declaration order and calls
//! `ExpandEnv::expand_env` on it, so string fields expand and nested
//! structs recurse. Mark a field `#[expand_env(skip)]` to leave it as read.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, parse_quote, Data, DeriveInput, Field, Index};

#[proc_macro_derive(ExpandEnv, attributes(expand_env))]
pub fn derive_expand_env(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_derive(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_derive(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let data = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "ExpandEnv can only be derived for structs",
            ))
        }
    };

    let mut visits = Vec::new();
    for (index, field) in data.fields.iter().enumerate() {
        if is_skipped(field)? {
            continue;
        }
        let member = match &field.ident {
            Some(ident) => quote!(#ident),
            None => {
                let index = Index::from(index);
                quote!(#index)
            }
        };
        visits.push(quote! {
            ::dbmagic::config::ExpandEnv::expand_env(&mut self.#member, env);
        });
    }

    let env = if visits.is_empty() {
        format_ident!("_env")
    } else {
        format_ident!("env")
    };

    let mut generics = input.generics.clone();
    let type_params: Vec<_> = generics.type_params().map(|p| p.ident.clone()).collect();
    if !type_params.is_empty() {
        let where_clause = generics.make_where_clause();
        for ident in type_params {
            where_clause
                .predicates
                .push(parse_quote!(#ident: ::dbmagic::config::ExpandEnv));
        }
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::dbmagic::config::ExpandEnv for #name #ty_generics #where_clause {
            fn expand_env(&mut self, #env: &::dbmagic::config::EnvLookup<'_>) {
                #(#visits)*
            }
        }
    })
}

fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("expand_env") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported expand_env attribute, expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}
