//! Validators and cleaners for form fields
//!
//! Attach them to a [`FormField`](crate::core::form::FormField) with
//! `validator(..)` and `cleaner(..)`.

pub mod filters;
pub mod validators;
