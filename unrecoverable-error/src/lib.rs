#![no_std]
#![warn(missing_docs)]

//! A crate for handling unrecoverable errors in `#![no_std]` environments.
//!
//! This crate provides a mechanism for handling unrecoverable errors in `#![no_std]` environments,
//! similar to how `panic!` works in standard Rust, but with more control over error handling.
//!
//! # Overview
//!
//! The crate provides:
//! - A trait for unrecoverable errors
//! - A default error handler that panics
//! - A way to install a different handler at runtime
//! - Location tracking for errors
//!
//! # Usage
//!
//! ```rust
//! use unrecoverable_error::{UnrecoverableError, unrecoverable_error};
//!
//! #[derive(Debug)]
//! struct ConfigError {
//!     field: &'static str,
//! }
//!
//! impl core::fmt::Display for ConfigError {
//!     fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
//!         write!(f, "Invalid configuration: {}", self.field)
//!     }
//! }
//!
//! impl UnrecoverableError for ConfigError {}
//!
//! let result = std::panic::catch_unwind(|| {
//!     // This will call the default handler (which panics)
//!     unrecoverable_error!(ConfigError { field: "timeout" });
//! });
//! assert!(result.is_err());
//! ```
//!
//! The handler is stored behind a [`critical_section::Mutex`], so it can be
//! replaced and consulted from both thread and interrupt context. A
//! `critical-section` implementation must be linked into the final binary.

use core::cell::Cell;
use core::panic::Location;
use critical_section::Mutex;

/// A trait for unrecoverable errors.
///
/// This trait is used to represent errors that cannot be recovered from.
/// It is similar to the `core::error::Error` trait, but does not require
/// the error to be `'static` in source return value, which is not
/// necessary if the stack is not unwound when the error is raised.
pub trait UnrecoverableError: core::fmt::Debug + core::fmt::Display {
    /// Returns the source of this error, if any.
    fn source(&self) -> Option<&dyn UnrecoverableError> {
        None
    }
}

/// Information about an unrecoverable error, including the error itself and optional location.
///
/// This struct is passed to error handlers and contains all the information
/// about the error that occurred.
pub struct UnrecoverableErrorInfo<'a> {
    /// The unrecoverable error that occurred
    pub error: &'a dyn UnrecoverableError,
    /// Optional location where the error occurred
    pub location: Option<&'a Location<'a>>,
}

impl core::fmt::Display for UnrecoverableErrorInfo<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.location {
            Some(location) => write!(f, "Unrecoverable error at {}: {}", location, self.error),
            None => write!(f, "Unrecoverable error: {}", self.error),
        }
    }
}

/// Signature of an unrecoverable error handler.
pub type UnrecoverableErrorHandler = fn(&UnrecoverableErrorInfo) -> !;

static HANDLER: Mutex<Cell<Option<UnrecoverableErrorHandler>>> = Mutex::new(Cell::new(None));

/// The default error handler that panics.
pub fn default_unrecoverable_error_handler(info: &UnrecoverableErrorInfo) -> ! {
    panic!("{}", info)
}

/// Installs `handler` as the unrecoverable error handler and returns the
/// previously installed one, if any.
pub fn set_unrecoverable_error_handler(
    handler: UnrecoverableErrorHandler,
) -> Option<UnrecoverableErrorHandler> {
    critical_section::with(|cs| HANDLER.borrow(cs).replace(Some(handler)))
}

/// Removes the installed handler, restoring the default panicking handler.
pub fn reset_unrecoverable_error_handler() -> Option<UnrecoverableErrorHandler> {
    critical_section::with(|cs| HANDLER.borrow(cs).take())
}

/// Function to handle unrecoverable errors.
///
/// This function is called by the `unrecoverable_error!` macro to handle
/// unrecoverable errors. It will call the installed handler if there is
/// one, otherwise the default handler.
#[track_caller]
pub fn handle_unrecoverable_error(error: &dyn UnrecoverableError) -> ! {
    let info = UnrecoverableErrorInfo {
        error,
        location: Some(Location::caller()),
    };
    // The handler is copied out so that it runs outside of the critical section.
    let handler = critical_section::with(|cs| HANDLER.borrow(cs).get())
        .unwrap_or(default_unrecoverable_error_handler);
    handler(&info)
}

/// Raise an unrecoverable error.
#[macro_export]
macro_rules! unrecoverable_error {
    ($error:expr) => {
        $crate::handle_unrecoverable_error(&$error)
    };
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    #[derive(Debug)]
    struct Overheat {
        celsius: u32,
    }

    impl core::fmt::Display for Overheat {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "Overheat at {} C", self.celsius)
        }
    }

    impl UnrecoverableError for Overheat {}

    #[test]
    #[should_panic(expected = "Overheat at 120 C")]
    fn default_handler_panics_with_message() {
        unrecoverable_error!(Overheat { celsius: 120 });
    }

    #[test]
    fn info_display_includes_location() {
        let error = Overheat { celsius: 5 };
        let info = UnrecoverableErrorInfo {
            error: &error,
            location: Some(Location::caller()),
        };
        let text = std::format!("{}", info);
        assert!(text.starts_with("Unrecoverable error at "));
        assert!(text.ends_with("Overheat at 5 C"));
    }
}
