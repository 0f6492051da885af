//! Fixed identifiers shared by tests

/// Realm name served by the mock identity provider.
pub const TEST_REALM: &str = "spenzy";

/// Client id of the service under test (the expected token audience).
pub const TEST_CLIENT_ID: &str = "document-service";

/// Client secret of the service under test.
pub const TEST_CLIENT_SECRET: &str = "document-service-secret";

/// Client the user's tokens are originally issued to.
pub const TEST_SOURCE_CLIENT_ID: &str = "mobile-app";

/// Issuer placed in fixture tokens.
pub const TEST_ISSUER: &str = "http://localhost:8080/realms/spenzy";

/// Outbound service identity used by credential cache tests.
pub const TEST_SERVICE_CLIENT_ID: &str = "category-reader";

/// Secret of [`TEST_SERVICE_CLIENT_ID`].
pub const TEST_SERVICE_CLIENT_SECRET: &str = "category-reader-secret";
