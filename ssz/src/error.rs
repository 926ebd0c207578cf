use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum ReadError {
    #[error("expected vector to have {expected} elements, found {actual} elements")]
    VectorSizeMismatch { expected: usize, actual: usize },
    #[error("expected list to have no more than {maximum} elements, found {actual} elements")]
    ListTooLong { maximum: usize, actual: usize },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("list is full (maximum: {maximum})")]
pub struct PushError {
    pub maximum: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("index out of bounds (length: {length}, index: {index})")]
pub struct IndexError {
    pub length: usize,
    pub index: usize,
}
