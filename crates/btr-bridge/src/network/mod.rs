//! HTTP access for the background context.
//!
//! [`ResilientFetch`] is the only place requests are issued; it shares the
//! runtime's token cache so tokens learned from incoming calls are attached
//! to outgoing mutating requests.

mod client;

pub use client::{RequestBody, RequestOptions, ResilientFetch};
