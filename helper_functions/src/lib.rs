pub mod accessors;
pub mod error;
pub mod misc;
pub mod mutators;
pub mod phase1;
pub mod predicates;
pub mod signing;
pub mod verifier;
