//! # recoder-error
//!
//! The one error type used across recoder.
//!
//! Only fatal conditions are errors: a model backend that cannot be reached,
//! output that does not fit the solution schema, a missing interpreter, a
//! timeout, a cancelled run. Generated code that raises is *not* an error;
//! it is a verdict the loop feeds back to the model.
//!
//! ```rust
//! use recoder_error::{Error, ErrorKind};
//!
//! fn check() -> recoder_error::Result<()> {
//!     Err(Error::new(ErrorKind::ExecutionTimeout, "interpreter exceeded 30s")
//!         .with_operation("sandbox::execute")
//!         .with_context("stage", "execution"))
//! }
//!
//! assert_eq!(check().unwrap_err().kind(), ErrorKind::ExecutionTimeout);
//! ```
//!
//! Conventions:
//! - wrap foreign errors with `set_source`, pick the kind at the call site
//! - handle an error once; callers further up only add operation and context

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::{ErrorKind, UnknownErrorKind};
pub use status::ErrorStatus;

pub type Result<T> = std::result::Result<T, Error>;
