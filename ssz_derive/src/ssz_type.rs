use darling::{ast::Data, FromDeriveInput, FromField};
use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{
    parse_quote, punctuated::Punctuated, token::Comma, Error, Generics, Ident, Member, Path, Type,
    WhereClause, WherePredicate,
};

use crate::crate_path;

#[derive(FromField)]
#[darling(attributes(ssz))]
pub struct SszField {
    ident: Option<Ident>,
    ty: Type,

    // Skipped fields do not contribute to the root. Used for caches stored inside containers.
    #[darling(default)]
    skip: bool,
}

#[derive(FromDeriveInput)]
#[darling(attributes(ssz))]
pub struct SszType {
    ident: Ident,
    generics: Generics,
    data: Data<(), SszField>,

    // Replaces the where clause of the generated impl. Named after the `serde` attribute.
    bound: Option<Punctuated<WherePredicate, Comma>>,
    // This is needed to make deriving work inside the `ssz` crate itself.
    #[darling(default)]
    internal: bool,
    // Newtypes marked with this hash exactly like the type they wrap.
    #[darling(default)]
    transparent: bool,
}

impl SszType {
    pub fn impls(&self) -> Result<TokenStream, Error> {
        let ssz = self.ssz_path()?;
        let ident = &self.ident;
        let (impl_generics, ty_generics, where_clause) = self.generics.split_for_impl();

        let where_clause = self
            .bound
            .clone()
            .map(|predicates| WhereClause {
                where_token: parse_quote! { where },
                predicates,
            })
            .or_else(|| where_clause.cloned());

        let fields = self.unskipped_fields()?;

        if self.transparent {
            let [(member, field)] = fields.as_slice() else {
                return Err(Error::new(
                    Span::call_site(),
                    "transparent containers must have exactly one unskipped field",
                ));
            };

            let ty = &field.ty;

            return Ok(quote! {
                impl #impl_generics #ssz::SszHash for #ident #ty_generics #where_clause {
                    type PackingFactor = <#ty as #ssz::SszHash>::PackingFactor;

                    #[inline]
                    fn hash_tree_root(&self) -> #ssz::H256 {
                        #ssz::SszHash::hash_tree_root(&self.#member)
                    }
                }
            });
        }

        let root = Self::merkleize(
            &ssz,
            fields
                .iter()
                .map(|(member, _)| quote! { #ssz::SszHash::hash_tree_root(&self.#member) })
                .collect(),
        )?;

        Ok(quote! {
            impl #impl_generics #ssz::SszHash for #ident #ty_generics #where_clause {
                type PackingFactor = #ssz::U1;

                fn hash_tree_root(&self) -> #ssz::H256 {
                    #root
                }
            }
        })
    }

    // Builds the expression for the root of a tree over field roots.
    // Missing right siblings are filled with the zero subtree root of the current level.
    fn merkleize(ssz: &Path, mut level: Vec<TokenStream>) -> Result<TokenStream, Error> {
        if level.is_empty() {
            return Err(Error::new(
                Span::call_site(),
                "struct has no unskipped fields",
            ));
        }

        let mut height = 0_usize;

        while level.len() > 1 {
            let zero_hash = quote! { #ssz::hashing::ZERO_HASHES[#height] };

            level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => quote! { #ssz::hashing::hash_256_256(#left, #right) },
                    [left] => quote! { #ssz::hashing::hash_256_256(#left, #zero_hash) },
                    _ => unreachable!("slice::chunks yields 1 or 2 elements"),
                })
                .collect();

            height += 1;
        }

        Ok(level.into_iter().next().unwrap_or_default())
    }

    fn ssz_path(&self) -> Result<Path, Error> {
        if self.internal {
            Ok(parse_quote! { crate })
        } else {
            crate_path::crate_path("ssz")
        }
    }

    fn unskipped_fields(&self) -> Result<Vec<(Member, &SszField)>, Error> {
        match &self.data {
            Data::Enum(_) => Err(Error::new(
                Span::call_site(),
                "SSZ unions are not implemented",
            )),
            Data::Struct(fields) => Ok(fields
                .iter()
                .enumerate()
                .filter(|(_, field)| !field.skip)
                .map(|(position, field)| {
                    let member = field
                        .ident
                        .clone()
                        .map_or_else(|| Member::Unnamed(position.into()), Member::Named);
                    (member, field)
                })
                .collect()),
        }
    }
}
