//! Language Server Protocol client
//!
//! JSON-RPC 2.0 over stdio with `Content-Length` framing. One
//! [`LanguageServerInstance`] per language, managed by [`LspClient`].

pub mod client;
pub mod codec;
pub mod config;
pub mod parse;
pub mod protocol;
pub mod server;

pub use client::LspClient;
pub use codec::LspCodec;
pub use config::LspConfig;
pub use server::{LanguageServerInstance, ServerState};
