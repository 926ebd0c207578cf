use derive_more::{AsRef, From};

pub const SIZE: usize = 32;

// Deliberately not `Copy` and not `Debug` to make leaking secret keys harder.
#[derive(Default, AsRef, From)]
#[as_ref(forward)]
pub struct SecretKeyBytes {
    pub(crate) bytes: [u8; SIZE],
}
