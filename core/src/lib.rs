pub mod error;
pub mod kind;
pub mod manifest;
pub mod resource;

pub use kind::{ApiGroupResources, GroupVersion, ResolveError, ResolvedKind};
