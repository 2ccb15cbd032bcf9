use async_trait::async_trait;

use shared::{
    domain::{ListingId, ListingWithProvider, Member},
    error::{AuthError, CatalogError},
};

pub mod catalog;
mod durable_identity;
pub mod session_manager;

pub use catalog::{
    categories_of, filter_listings, format_price, CategoryFilter, ListingCatalog, ListingQuery,
};
pub use durable_identity::DurableIdentityProvider;
pub use session_manager::{RevocationWatch, SessionManager, SessionState};

/// Boundary to the external identity provider. Implementations own
/// credential creation, verification and the persisted session token; the
/// session manager never sees raw credentials beyond passing them through.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Member, AuthError>;
    async fn authenticate(&self, email: &str, password: &str) -> Result<Member, AuthError>;
    /// Resolves a previously persisted credential to its member, if any is
    /// still valid. `None` is the normal "no restorable session" outcome.
    async fn current_identity(&self) -> Result<Option<Member>, AuthError>;
    async fn revoke(&self) -> Result<(), AuthError>;
}

pub struct MissingIdentityProvider;

#[async_trait]
impl IdentityProvider for MissingIdentityProvider {
    async fn create_identity(
        &self,
        _email: &str,
        _password: &str,
        _full_name: &str,
    ) -> Result<Member, AuthError> {
        Err(AuthError::ProviderUnavailable(
            "identity provider is unavailable".into(),
        ))
    }

    async fn authenticate(&self, _email: &str, _password: &str) -> Result<Member, AuthError> {
        Err(AuthError::ProviderUnavailable(
            "identity provider is unavailable".into(),
        ))
    }

    async fn current_identity(&self) -> Result<Option<Member>, AuthError> {
        Err(AuthError::ProviderUnavailable(
            "identity provider is unavailable".into(),
        ))
    }

    async fn revoke(&self) -> Result<(), AuthError> {
        Err(AuthError::ProviderUnavailable(
            "identity provider is unavailable".into(),
        ))
    }
}

/// Read boundary to the relational store for the listing catalog.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn active_listings(&self) -> Result<Vec<ListingWithProvider>, CatalogError>;
    async fn listing(&self, id: &ListingId) -> Result<Option<ListingWithProvider>, CatalogError>;
}

pub struct MissingListingStore;

#[async_trait]
impl ListingStore for MissingListingStore {
    async fn active_listings(&self) -> Result<Vec<ListingWithProvider>, CatalogError> {
        Err(CatalogError::Fetch("listing store is unavailable".into()))
    }

    async fn listing(&self, _id: &ListingId) -> Result<Option<ListingWithProvider>, CatalogError> {
        Err(CatalogError::Fetch("listing store is unavailable".into()))
    }
}

#[async_trait]
impl ListingStore for storage::Storage {
    async fn active_listings(&self) -> Result<Vec<ListingWithProvider>, CatalogError> {
        self.active_listings_with_provider()
            .await
            .map_err(|err| CatalogError::Fetch(err.to_string()))
    }

    async fn listing(&self, id: &ListingId) -> Result<Option<ListingWithProvider>, CatalogError> {
        self.listing_with_provider(id)
            .await
            .map_err(|err| CatalogError::Fetch(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
