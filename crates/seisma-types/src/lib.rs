//! Public types shared between the seisma engine and its collaborators:
//! the calculation configuration surface and the error reporting contract.

pub mod config;
pub mod error;
