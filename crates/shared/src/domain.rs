use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(OrganizationId);
id_newtype!(MemberId);
id_newtype!(ListingId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Provider,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Fixed,
    Hourly,
    Negotiable,
}

/// A vouching institution (church). The referral code is unique and
/// immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub organization_id: OrganizationId,
    pub name: String,
    pub contact_name: String,
    pub contact_email: String,
    pub location: Option<String>,
    pub affiliation: Option<String>,
    pub member_count: i64,
    pub status: AccountStatus,
    pub referral_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An individual account. `organization_id` is a weak reference: the
/// organization may be deleted independently and the member keeps the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: MemberId,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub role: Role,
    pub status: AccountStatus,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A service offering created by a provider. Deleting the provider
/// deactivates its listings rather than deleting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: ListingId,
    pub provider_id: MemberId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_type: PriceType,
    pub location: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A listing joined to its provider's public profile. Every fetched listing
/// carries a resolved provider; there is no partially joined shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingWithProvider {
    pub listing: Listing,
    pub provider: Member,
}
