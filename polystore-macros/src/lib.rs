//! Procedural macros for the polystore project.
//!
//! Provides `#[derive(Record)]`, which implements the row contract of typed collections
//! for a struct with named fields.

#[allow(unused_extern_crates)]
extern crate self as polystore_macros;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, parse_macro_input, spanned::Spanned};

/// Derives `polystore::record::Record`.
///
/// The collection name comes from `#[record(collection = "...")]` and defaults to the
/// struct name in snake case. The id field is the one marked `#[record(id)]`, else the
/// field named `id`. It must be an `Option<ObjectId>`.
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize, Record)]
/// #[record(collection = "users")]
/// pub struct User {
///     #[record(id)]
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub key: Option<ObjectId>,
///     pub name: String,
/// }
/// ```
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand_record(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_record(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut collection = None;
    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("record")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(meta.error("collection name must not be empty"));
                }
                collection = Some(value);
                Ok(())
            } else {
                Err(meta.error("unsupported record attribute, expected `collection`"))
            }
        })?;
    }
    let collection = collection.unwrap_or_else(|| LitStr::new(&snake_case(&name.to_string()), Span::call_site()));

    let id = id_field(&input)?;

    Ok(quote! {
        impl #impl_generics ::polystore::record::Record for #name #ty_generics #where_clause {
            fn id(&self) -> ::std::option::Option<&::polystore::bson::oid::ObjectId> {
                self.#id.as_ref()
            }

            fn set_id(&mut self, id: ::polystore::bson::oid::ObjectId) {
                self.#id = ::std::option::Option::Some(id);
            }

            fn collection_name() -> &'static str {
                #collection
            }
        }
    })
}

fn id_field(input: &DeriveInput) -> syn::Result<Ident> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(input.span(), "Record can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(data.fields.span(), "Record requires named fields"));
    };

    let mut marked = None;
    for field in &fields.named {
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("record")) {
            attr.parse_nested_meta(|meta| {
                if !meta.path.is_ident("id") {
                    return Err(meta.error("unsupported record field attribute, expected `id`"));
                }
                if marked.is_some() {
                    return Err(meta.error("only one field can be marked #[record(id)]"));
                }
                marked = field.ident.clone();
                Ok(())
            })?;
        }
    }

    marked
        .or_else(|| {
            fields
                .named
                .iter()
                .filter_map(|field| field.ident.clone())
                .find(|ident| ident == "id")
        })
        .ok_or_else(|| syn::Error::new(input.ident.span(), "no id field: mark one with #[record(id)] or name it `id`"))
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);

    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }

    out
}
