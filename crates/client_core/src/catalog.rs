use std::sync::Arc;

use shared::{
    domain::{Listing, ListingId, ListingWithProvider, PriceType},
    error::CatalogError,
};

use crate::ListingStore;

pub const CURRENCY_SYMBOL: &str = "£";
pub const CATEGORY_ALL: &str = "all";

/// Category constraint for [`filter_listings`]. Named categories match
/// case-sensitively and exactly, mirroring how categories are entered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Named(String),
}

impl CategoryFilter {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    fn matches(&self, category: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(name) => name == category,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    pub search_text: String,
    pub category: CategoryFilter,
}

/// Fetch side of the catalog. Filtering and formatting are free functions
/// below since they operate purely on already-fetched data.
pub struct ListingCatalog<S: ListingStore> {
    store: Arc<S>,
}

impl<S: ListingStore> ListingCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Active listings with provider attached, newest created first (id
    /// descending on ties). Never retries internally; the operation is
    /// idempotent and safe for the caller to re-issue. Concurrent fetches
    /// may race; discarding stale responses is the caller's job.
    pub async fn fetch_active_listings(&self) -> Result<Vec<ListingWithProvider>, CatalogError> {
        self.store.active_listings().await
    }

    /// Single-listing lookup. `Ok(None)` is the normal not-found outcome,
    /// distinct from a store failure.
    pub async fn fetch_listing(
        &self,
        id: &ListingId,
    ) -> Result<Option<ListingWithProvider>, CatalogError> {
        self.store.listing(id).await
    }
}

/// Pure, stable filter over an already-fetched set. A listing matches when
/// its category passes the filter and, if search text is present, that text
/// occurs case-insensitively in the title or the description. The input
/// order is preserved and the input is never mutated.
pub fn filter_listings(
    listings: &[ListingWithProvider],
    query: &ListingQuery,
) -> Vec<ListingWithProvider> {
    let needle = query.search_text.to_lowercase();
    listings
        .iter()
        .filter(|entry| {
            query.category.matches(&entry.listing.category)
                && (needle.is_empty()
                    || entry.listing.title.to_lowercase().contains(&needle)
                    || entry.listing.description.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

/// Price label policy:
/// no bounds at all reads "Price negotiable"; a single bound (or two equal
/// bounds) renders that value; distinct bounds render a range. Hourly
/// listings get a `/hr` suffix. Values keep their stored precision.
pub fn format_price(listing: &Listing) -> String {
    let suffix = if listing.price_type == PriceType::Hourly {
        "/hr"
    } else {
        ""
    };
    match (listing.price_min, listing.price_max) {
        (None, None) => "Price negotiable".to_string(),
        (Some(min), Some(max)) if min != max => {
            format!("{CURRENCY_SYMBOL}{min} - {CURRENCY_SYMBOL}{max}{suffix}")
        }
        (Some(value), _) | (None, Some(value)) => format!("{CURRENCY_SYMBOL}{value}{suffix}"),
    }
}

/// Distinct categories across the fetched set, headed by the implicit
/// "all" entry, in first-appearance order. Recomputed per fetch, never
/// persisted.
pub fn categories_of(listings: &[ListingWithProvider]) -> Vec<String> {
    let mut categories = vec![CATEGORY_ALL.to_string()];
    for entry in listings {
        if !categories.iter().any(|known| known == &entry.listing.category) {
            categories.push(entry.listing.category.clone());
        }
    }
    categories
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
