//! Reference indexing and resolution for multi-document OpenAPI
//! specifications.
//!
//! There are two top-level modules to this crate:
//!
//! * `tree` - the ordered node arena documents are parsed into, plus JSON
//!   pointer and path utilities.
//! * `index` - the rolodex: multi-document reference indexing, circular
//!   reference detection and classification, and destructive resolution.
//!
//! The above are re-exports of the individual `oas-tree` and `oas-index`
//! crates, respectively.
//!
//! # Examples
//!
//! Indexing a root document and checking it for circular references:
//!
//! ```no_run
//! use oas::index::IndexConfig;
//! use oas::index::Rolodex;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IndexConfig::default().with_spec_absolute_path("/specs/root.yaml");
//! let rolodex = Rolodex::new(config);
//! rolodex.add_local_source("/specs");
//! rolodex.set_root_source(&std::fs::read_to_string("/specs/root.yaml")?)?;
//! rolodex.index_the_rolodex()?;
//!
//! for cycle in rolodex.get_infinite_circular_references() {
//!     eprintln!("infinite cycle: {path}", path = cycle.journey_path());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "index")]
#[doc(inline)]
pub use oas_index as index;

#[cfg(feature = "tree")]
#[doc(inline)]
pub use oas_tree as tree;
