//! HLS playlist handling: line classification, parsing, and URI rewriting.

pub mod attributes;
pub mod parser;
pub mod policy;
pub mod resolve;
pub mod rewriter;
pub mod tags;

pub use parser::{PlaylistDocument, PlaylistKind, parse};
pub use policy::RewritePolicy;
pub use resolve::resolve_url;
pub use rewriter::{PlaylistRewriter, ProxyUriBuilder};
