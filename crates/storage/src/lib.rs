use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    AccountStatus, Listing, ListingId, ListingWithProvider, Member, MemberId, Organization,
    OrganizationId, PriceType, Role,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub contact_name: String,
    pub contact_email: String,
    pub location: Option<String>,
    pub affiliation: Option<String>,
    pub referral_code: String,
}

#[derive(Debug, Clone)]
pub struct NewMember {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub role: Role,
    pub status: AccountStatus,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub provider_id: MemberId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_type: PriceType,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub member_id: MemberId,
    pub password_salt: String,
    pub password_hash: String,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_organization(&self, new: NewOrganization) -> Result<Organization> {
        let organization_id = OrganizationId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO organizations (id, name, contact_name, contact_email, location, affiliation, member_count, status, referral_code, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, 'pending', ?, ?, ?)",
        )
        .bind(&organization_id.0)
        .bind(&new.name)
        .bind(&new.contact_name)
        .bind(&new.contact_email)
        .bind(&new.location)
        .bind(&new.affiliation)
        .bind(&new.referral_code)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create organization with referral code '{}'", new.referral_code))?;

        Ok(Organization {
            organization_id,
            name: new.name,
            contact_name: new.contact_name,
            contact_email: new.contact_email,
            location: new.location,
            affiliation: new.affiliation,
            member_count: 0,
            status: AccountStatus::Pending,
            referral_code: new.referral_code,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn organization_by_id(&self, id: &OrganizationId) -> Result<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, contact_name, contact_email, location, affiliation, member_count, status, referral_code, created_at, updated_at
             FROM organizations WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| organization_from_row(&r)))
    }

    pub async fn organization_by_referral_code(&self, code: &str) -> Result<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, contact_name, contact_email, location, affiliation, member_count, status, referral_code, created_at, updated_at
             FROM organizations WHERE referral_code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| organization_from_row(&r)))
    }

    pub async fn set_organization_status(
        &self,
        id: &OrganizationId,
        status: AccountStatus,
    ) -> Result<bool> {
        let updated = sqlx::query("UPDATE organizations SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(Utc::now())
            .bind(&id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn create_member(&self, new: NewMember) -> Result<Member> {
        let mut tx = self.pool.begin().await?;
        let member = insert_member(&mut tx, new).await?;
        tx.commit().await?;
        Ok(member)
    }

    /// Creates a member together with their stored credentials in one
    /// transaction, so a failure on either insert leaves no orphaned
    /// member behind to block the email on retry.
    pub async fn create_member_with_credentials(
        &self,
        new: NewMember,
        password_salt: &str,
        password_hash: &str,
    ) -> Result<Member> {
        let mut tx = self.pool.begin().await?;
        let member = insert_member(&mut tx, new).await?;

        sqlx::query(
            "INSERT INTO credentials (member_id, email, password_salt, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&member.member_id.0)
        .bind(&member.email)
        .bind(password_salt)
        .bind(password_hash)
        .bind(member.created_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to store credentials for '{}'", member.email))?;

        tx.commit().await?;
        Ok(member)
    }

    pub async fn member_by_id(&self, id: &MemberId) -> Result<Option<Member>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| member_from_row(&r, 0)))
    }

    pub async fn member_by_email(&self, email: &str) -> Result<Option<Member>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE email = ?"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| member_from_row(&r, 0)))
    }

    pub async fn set_member_status(&self, id: &MemberId, status: AccountStatus) -> Result<bool> {
        let updated = sqlx::query("UPDATE members SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(Utc::now())
            .bind(&id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    /// Removes a member. The member's listings are deactivated rather than
    /// deleted so that existing references stay resolvable in audit trails.
    pub async fn delete_member(&self, id: &MemberId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        deactivate_provider_listings(&mut tx, id, now).await?;
        sqlx::query("DELETE FROM auth_tokens WHERE member_id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM credentials WHERE member_id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM members WHERE id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    pub async fn create_listing(&self, new: NewListing) -> Result<Listing> {
        if let Some(min) = new.price_min {
            if min < 0.0 {
                bail!("price_min must be non-negative, got {min}");
            }
        }
        if let Some(max) = new.price_max {
            if max < 0.0 {
                bail!("price_max must be non-negative, got {max}");
            }
        }
        if let (Some(min), Some(max)) = (new.price_min, new.price_max) {
            if min > max {
                bail!("price_min {min} exceeds price_max {max}");
            }
        }

        let listing_id = ListingId::generate();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO listings (id, provider_id, title, description, category, price_min, price_max, price_type, location, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&listing_id.0)
        .bind(&new.provider_id.0)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.category)
        .bind(new.price_min)
        .bind(new.price_max)
        .bind(price_type_to_str(new.price_type))
        .bind(&new.location)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create listing '{}'", new.title))?;

        Ok(Listing {
            listing_id,
            provider_id: new.provider_id,
            title: new.title,
            description: new.description,
            category: new.category,
            price_min: new.price_min,
            price_max: new.price_max,
            price_type: new.price_type,
            location: new.location,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn set_listing_active(&self, id: &ListingId, active: bool) -> Result<bool> {
        let updated = sqlx::query("UPDATE listings SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(&id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn deactivate_listings_for_provider(&self, provider_id: &MemberId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let updated = deactivate_provider_listings(&mut tx, provider_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Active listings joined to their provider, newest created first.
    /// Ties on the creation timestamp break on id descending so repeated
    /// fetches of the same data always agree on the order.
    pub async fn active_listings_with_provider(&self) -> Result<Vec<ListingWithProvider>> {
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_JOIN_COLUMNS}
             FROM listings l
             INNER JOIN members m ON m.id = l.provider_id
             WHERE l.is_active = 1
             ORDER BY l.created_at DESC, l.id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(listing_with_provider_from_row).collect())
    }

    pub async fn listing_with_provider(
        &self,
        id: &ListingId,
    ) -> Result<Option<ListingWithProvider>> {
        let row = sqlx::query(&format!(
            "SELECT {LISTING_JOIN_COLUMNS}
             FROM listings l
             INNER JOIN members m ON m.id = l.provider_id
             WHERE l.id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(listing_with_provider_from_row))
    }

    pub async fn create_credentials(
        &self,
        member_id: &MemberId,
        email: &str,
        password_salt: &str,
        password_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (member_id, email, password_salt, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&member_id.0)
        .bind(email)
        .bind(password_salt)
        .bind(password_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store credentials for '{email}'"))?;
        Ok(())
    }

    pub async fn credentials_by_email(&self, email: &str) -> Result<Option<StoredCredentials>> {
        let row = sqlx::query(
            "SELECT member_id, password_salt, password_hash FROM credentials WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredCredentials {
            member_id: MemberId(r.get::<String, _>(0)),
            password_salt: r.get::<String, _>(1),
            password_hash: r.get::<String, _>(2),
        }))
    }

    pub async fn insert_auth_token(
        &self,
        token: &str,
        member_id: &MemberId,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_tokens (token, member_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(&member_id.0)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolves a session token to its member if the token is still live.
    pub async fn member_for_token(&self, token: &str) -> Result<Option<Member>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_JOIN_COLUMNS}
             FROM auth_tokens t
             INNER JOIN members m ON m.id = t.member_id
             WHERE t.token = ? AND t.revoked_at IS NULL AND t.expires_at > ?"
        ))
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| member_from_row(&r, 0)))
    }

    pub async fn revoke_token(&self, token: &str) -> Result<bool> {
        let updated =
            sqlx::query("UPDATE auth_tokens SET revoked_at = ? WHERE token = ? AND revoked_at IS NULL")
                .bind(Utc::now())
                .bind(token)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(updated > 0)
    }
}

async fn insert_member(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    new: NewMember,
) -> Result<Member> {
    let member_id = MemberId::generate();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO members (id, email, full_name, phone, organization_id, role, status, bio, avatar_url, location, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&member_id.0)
    .bind(&new.email)
    .bind(&new.full_name)
    .bind(&new.phone)
    .bind(new.organization_id.as_ref().map(|id| id.0.as_str()))
    .bind(role_to_str(new.role))
    .bind(status_to_str(new.status))
    .bind(&new.bio)
    .bind(&new.avatar_url)
    .bind(&new.location)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to create member '{}'", new.email))?;

    if let Some(organization_id) = &new.organization_id {
        sqlx::query(
            "UPDATE organizations SET member_count = member_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(&organization_id.0)
        .execute(&mut **tx)
        .await?;
    }

    Ok(Member {
        member_id,
        email: new.email,
        full_name: new.full_name,
        phone: new.phone,
        organization_id: new.organization_id,
        role: new.role,
        status: new.status,
        bio: new.bio,
        avatar_url: new.avatar_url,
        location: new.location,
        created_at: now,
        updated_at: now,
    })
}

async fn deactivate_provider_listings(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    provider_id: &MemberId,
    now: DateTime<Utc>,
) -> Result<u64> {
    let updated =
        sqlx::query("UPDATE listings SET is_active = 0, updated_at = ? WHERE provider_id = ?")
            .bind(now)
            .bind(&provider_id.0)
            .execute(&mut **tx)
            .await?
            .rows_affected();
    Ok(updated)
}

const MEMBER_COLUMNS: &str = "id, email, full_name, phone, organization_id, role, status, bio, avatar_url, location, created_at, updated_at";

const MEMBER_JOIN_COLUMNS: &str = "m.id, m.email, m.full_name, m.phone, m.organization_id, m.role, m.status, m.bio, m.avatar_url, m.location, m.created_at, m.updated_at";

const LISTING_JOIN_COLUMNS: &str = "l.id, l.provider_id, l.title, l.description, l.category, l.price_min, l.price_max, l.price_type, l.location, l.is_active, l.created_at, l.updated_at, \
     m.id, m.email, m.full_name, m.phone, m.organization_id, m.role, m.status, m.bio, m.avatar_url, m.location, m.created_at, m.updated_at";

fn organization_from_row(r: &SqliteRow) -> Organization {
    Organization {
        organization_id: OrganizationId(r.get::<String, _>(0)),
        name: r.get::<String, _>(1),
        contact_name: r.get::<String, _>(2),
        contact_email: r.get::<String, _>(3),
        location: r.get::<Option<String>, _>(4),
        affiliation: r.get::<Option<String>, _>(5),
        member_count: r.get::<i64, _>(6),
        status: status_from_str(&r.get::<String, _>(7)),
        referral_code: r.get::<String, _>(8),
        created_at: r.get::<DateTime<Utc>, _>(9),
        updated_at: r.get::<DateTime<Utc>, _>(10),
    }
}

/// Reads a member from `MEMBER_COLUMNS`-shaped columns starting at `base`.
fn member_from_row(r: &SqliteRow, base: usize) -> Member {
    Member {
        member_id: MemberId(r.get::<String, _>(base)),
        email: r.get::<String, _>(base + 1),
        full_name: r.get::<String, _>(base + 2),
        phone: r.get::<Option<String>, _>(base + 3),
        organization_id: r.get::<Option<String>, _>(base + 4).map(OrganizationId),
        role: role_from_str(&r.get::<String, _>(base + 5)),
        status: status_from_str(&r.get::<String, _>(base + 6)),
        bio: r.get::<Option<String>, _>(base + 7),
        avatar_url: r.get::<Option<String>, _>(base + 8),
        location: r.get::<Option<String>, _>(base + 9),
        created_at: r.get::<DateTime<Utc>, _>(base + 10),
        updated_at: r.get::<DateTime<Utc>, _>(base + 11),
    }
}

fn listing_with_provider_from_row(r: &SqliteRow) -> ListingWithProvider {
    ListingWithProvider {
        listing: Listing {
            listing_id: ListingId(r.get::<String, _>(0)),
            provider_id: MemberId(r.get::<String, _>(1)),
            title: r.get::<String, _>(2),
            description: r.get::<String, _>(3),
            category: r.get::<String, _>(4),
            price_min: r.get::<Option<f64>, _>(5),
            price_max: r.get::<Option<f64>, _>(6),
            price_type: price_type_from_str(&r.get::<String, _>(7)),
            location: r.get::<Option<String>, _>(8),
            is_active: r.get::<bool, _>(9),
            created_at: r.get::<DateTime<Utc>, _>(10),
            updated_at: r.get::<DateTime<Utc>, _>(11),
        },
        provider: member_from_row(r, 12),
    }
}

fn status_to_str(status: AccountStatus) -> &'static str {
    match status {
        AccountStatus::Pending => "pending",
        AccountStatus::Active => "active",
        AccountStatus::Suspended => "suspended",
    }
}

fn status_from_str(raw: &str) -> AccountStatus {
    match raw {
        "pending" => AccountStatus::Pending,
        "suspended" => AccountStatus::Suspended,
        _ => AccountStatus::Active,
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Member => "member",
        Role::Provider => "provider",
        Role::Admin => "admin",
    }
}

fn role_from_str(raw: &str) -> Role {
    match raw {
        "provider" => Role::Provider,
        "admin" => Role::Admin,
        _ => Role::Member,
    }
}

fn price_type_to_str(price_type: PriceType) -> &'static str {
    match price_type {
        PriceType::Fixed => "fixed",
        PriceType::Hourly => "hourly",
        PriceType::Negotiable => "negotiable",
    }
}

fn price_type_from_str(raw: &str) -> PriceType {
    match raw {
        "hourly" => PriceType::Hourly,
        "negotiable" => PriceType::Negotiable,
        _ => PriceType::Fixed,
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
