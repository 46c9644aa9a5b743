//! Ordered node trees and JSON pointer utilities for OpenAPI documents.
//!
//! This crate provides the tree representation the indexing layer operates
//! on:
//!
//! * `node` - an arena of ordered scalar/mapping/sequence nodes with
//!   line and column metadata and identity-stable ids.
//! * `yaml` - loading of YAML (and JSON, which the YAML 1.2 parser accepts)
//!   source into the arena.
//! * `pointer` - RFC 6901 JSON pointer encoding, decoding and resolution,
//!   plus URL fragment splitting.
//! * `paths` - composition of document-relative file paths into absolute,
//!   lexically cleaned keys.
//!
//! Nodes are addressed by [`NodeId`], which remains valid for the lifetime
//! of the owning [`NodeArena`]. The only permitted mutation of an existing
//! node is [`NodeArena::splice_children`], which the resolution layer uses
//! to replace a reference node's children with those of its target.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

mod node;
mod paths;
mod pointer;
mod yaml;

pub use node::*;
pub use paths::*;
pub use pointer::*;
pub use yaml::*;
