//! RPC methods that bypass authentication.

use std::collections::HashSet;

/// Methods callable without a bearer token: the credential RPCs themselves
/// and server reflection.
pub const DEFAULT_EXCLUDED_METHODS: &[&str] = &[
    "/auth.AuthService/Authenticate",
    "/auth.AuthService/RefreshToken",
    "/auth.AuthService/ExchangeToken",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
];

/// Immutable set of fully-qualified method paths (`/package.Service/Method`).
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    methods: HashSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `path` skips authentication. Matching is exact.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.methods.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_METHODS.iter().copied())
    }
}
