// Only `hash_tree_root` is derived. Containers in this workspace never travel over the wire,
// so there is nothing to gain from generating encoders and decoders.

use darling::FromDeriveInput as _;
use proc_macro::TokenStream;
use syn::{parse_macro_input, Error};

use crate::ssz_type::SszType;

mod crate_path;
mod ssz_type;

#[proc_macro_derive(Ssz, attributes(ssz))]
pub fn derive(input: TokenStream) -> TokenStream {
    match SszType::from_derive_input(&parse_macro_input!(input)) {
        Ok(ssz_type) => ssz_type.impls().unwrap_or_else(Error::into_compile_error),
        Err(error) => error.write_errors(),
    }
    .into()
}
