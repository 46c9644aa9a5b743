//! Multi-document reference indexing and resolution for OpenAPI documents.
//!
//! The heart of this crate is the [`Rolodex`]: a multi-document owner that
//! ingests a root YAML or JSON document and every sibling document reachable
//! through `$ref` chains (local filesystem and remote HTTP), builds a
//! [`SpecIndex`] for each one, detects and classifies circular reference
//! cycles, and can destructively resolve the tree by splicing referenced
//! subtrees in place of `$ref` nodes.
//!
//! A typical flow:
//!
//! ```no_run
//! use oas_index::IndexConfig;
//! use oas_index::Rolodex;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = IndexConfig::default().with_spec_absolute_path("/specs/root.yaml");
//! let rolodex = Rolodex::new(config);
//! rolodex.add_local_source("/specs");
//! rolodex.set_root_source(std::fs::read_to_string("/specs/root.yaml")?.as_str())?;
//! rolodex.index_the_rolodex()?;
//!
//! for cycle in rolodex.get_infinite_circular_references() {
//!     eprintln!("infinite: {path}", path = cycle.journey_path());
//! }
//!
//! let errors = rolodex.resolve();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

mod config;
mod error;
mod index;
mod reference;
mod resolver;
mod rolodex;
mod source;

pub use config::*;
pub use error::*;
pub use index::*;
pub use reference::*;
pub use resolver::*;
pub use rolodex::*;
pub use source::*;
