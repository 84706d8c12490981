#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro
)]

//! Grammar engine and command-routing core of the unicorn shell.
//!
//! Remote services advertise, at runtime, a grammar describing the
//! commands they accept. This crate models those grammars ([`Idl`],
//! [`Grammar`]), composes every known one into a single command language
//! with routing metadata ([`Language`]), completes partial input against
//! it ([`TokenStream`]), decodes full command lines into bus dispatches
//! ([`decode_command`]), and persists the known-IDL set ([`cache`]).
//!
//! Everything bus- and terminal-specific lives in the `unicorn-shell`
//! binary; this crate only defines the data the shell moves around.

pub mod cache;
pub mod decode;
pub mod grammar;
pub mod idl;
pub mod registry;
pub mod token;

pub use cache::CacheError;
pub use decode::{Dispatch, decode_command};
pub use grammar::{Grammar, GrammarError, Node, NodeId, NodeKind, OptionProvider};
pub use idl::{IDL_TOPIC_PREFIX, Idl, IdlError};
pub use registry::{Language, PrefixNode, Registry, Route};
pub use token::{Scanner, Token, TokenStream, Word};
