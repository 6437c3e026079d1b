//! Shared error taxonomy for the dbcrud data-access engine.
//!
//! Split out of the core crate so that driver-agnostic collaborators (the
//! dialect layer, the type map) can depend on the error type without pulling
//! in any particular wire driver.

mod error;

pub use error::{CrudError, Result};
