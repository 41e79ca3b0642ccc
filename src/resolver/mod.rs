pub mod base;
pub mod caching_resolver;
pub mod http_resolver;

pub use base::{
    BaseResolverFactory, HttpResolverFactory, IdentityResolver, ResolveError, ResolvedIdentity,
};
pub use caching_resolver::{create_resolver, CachingResolver};
pub use http_resolver::HttpResolver;
