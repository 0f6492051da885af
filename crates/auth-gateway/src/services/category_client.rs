//! Category service gRPC client.
//!
//! Service-to-service call to `expense.CategoryService/ListCategories`,
//! authenticated with this service's client-credentials token.
//!
//! # Security
//!
//! - Tokens come from the shared [`CredentialCache`] and never leave it
//!   except as the `authorization` metadata of an outbound call
//! - A downstream `UNAUTHENTICATED` triggers exactly one token refresh and
//!   retry
//!
//! The channel is lazy: construction never blocks on the category service
//! being up, and tonic reconnects on demand.

use crate::errors::GatewayError;
use common::credential_cache::{ClientIdentity, CredentialCache};
use common::secret::{ExposeSecret, SecretString};
use proto_gen::expense::category_service_client::CategoryServiceClient;
use proto_gen::expense::{Category, ListCategoriesRequest};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{error, instrument, warn};

/// Timeout for category RPCs.
const CATEGORY_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for the category channel.
const CATEGORY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Names of the built-in categories, in id order starting at 1.
const DEFAULT_CATEGORY_NAMES: [&str; 13] = [
    "Groceries",
    "Restaurants",
    "Electricity",
    "Communication",
    "Water",
    "Gas/Fuel",
    "Clothing",
    "Medical/Healthcare",
    "Household Items/Supplies",
    "Personal",
    "Education",
    "Entertainment",
    "Others",
];

/// Built-in category list used when the category service cannot answer.
#[must_use]
pub fn default_categories() -> Vec<Category> {
    DEFAULT_CATEGORY_NAMES
        .iter()
        .zip(1..)
        .map(|(name, id)| Category {
            id,
            name: (*name).to_string(),
        })
        .collect()
}

/// Client for the category service.
pub struct CategoryClient {
    channel: Channel,
    credentials: Arc<CredentialCache>,
    identity: ClientIdentity,
}

impl CategoryClient {
    /// Create a client with a lazily connected channel.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the endpoint is not a valid URI.
    pub fn new(
        endpoint: String,
        credentials: Arc<CredentialCache>,
        identity: ClientIdentity,
    ) -> Result<Self, GatewayError> {
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| {
                error!(
                    target: "gateway.services.category_client",
                    error = %e,
                    endpoint = %endpoint,
                    "Invalid category service endpoint"
                );
                GatewayError::Config(format!("Invalid category service endpoint: {e}"))
            })?
            .connect_timeout(CATEGORY_CONNECT_TIMEOUT)
            .timeout(CATEGORY_RPC_TIMEOUT)
            .connect_lazy();

        Ok(Self {
            channel,
            credentials,
            identity,
        })
    }

    /// List categories from the category service.
    ///
    /// # Errors
    ///
    /// - `GatewayError::Credential` if no token could be obtained
    /// - `GatewayError::Downstream` if the RPC failed (after one retry on
    ///   `UNAUTHENTICATED`)
    /// - `GatewayError::Internal` if the service reported failure
    #[instrument(skip_all, fields(client_id = %self.identity.client_id()))]
    pub async fn list_categories(&self) -> Result<Vec<Category>, GatewayError> {
        let response = self
            .credentials
            .call_with_retry(&self.identity, |token| {
                let channel = self.channel.clone();
                async move {
                    let request = with_bearer(ListCategoriesRequest {}, &token)?;
                    let mut client = CategoryServiceClient::new(channel);
                    let response = client.list_categories(request).await?;
                    Ok::<_, GatewayError>(response.into_inner())
                }
            })
            .await?;

        if !response.success {
            warn!(
                target: "gateway.services.category_client",
                error = %response.error_message,
                "Category service reported failure"
            );
            return Err(GatewayError::Internal(format!(
                "Category service reported failure: {}",
                response.error_message
            )));
        }

        Ok(response.categories)
    }

    /// List categories, falling back to [`default_categories`] on any failure.
    pub async fn categories_or_default(&self) -> Vec<Category> {
        match self.list_categories().await {
            Ok(categories) => categories,
            Err(e) => {
                warn!(
                    target: "gateway.services.category_client",
                    error = %e,
                    "Using default categories"
                );
                default_categories()
            }
        }
    }
}

/// Wrap `message` in a request carrying `authorization: Bearer <token>`.
fn with_bearer<T>(message: T, token: &SecretString) -> Result<Request<T>, GatewayError> {
    let mut request = Request::new(message);
    let value = format!("Bearer {}", token.expose_secret())
        .parse()
        .map_err(|_| {
            error!(target: "gateway.services.category_client", "Invalid service token format");
            GatewayError::Internal("Invalid service token format".to_string())
        })?;
    request.metadata_mut().insert("authorization", value);
    Ok(request)
}
