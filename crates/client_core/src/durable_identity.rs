use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use shared::{
    domain::{AccountStatus, Member, MemberId, Role},
    error::AuthError,
};
use storage::{NewMember, Storage};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::IdentityProvider;

const MIN_PASSWORD_LEN: usize = 8;
const TOKEN_TTL_HOURS: i64 = 24;

/// Identity provider persisted in the relational store: per-member salted
/// credential digests plus expiring session tokens. The live token is held
/// locally so a restarted process can hand it back via [`Self::restore`]
/// and resolve straight to an authenticated session.
pub struct DurableIdentityProvider {
    store: Storage,
    current_token: Mutex<Option<String>>,
}

impl DurableIdentityProvider {
    pub fn with_store(store: Storage) -> Self {
        Self {
            store,
            current_token: Mutex::new(None),
        }
    }

    /// Rehydrates a previously persisted session token, if the caller kept
    /// one across restarts. Validity is checked on the next
    /// `current_identity` call, not here.
    pub fn restore(store: Storage, token: Option<String>) -> Self {
        Self {
            store,
            current_token: Mutex::new(token),
        }
    }

    /// The live session token, for callers that persist it across restarts.
    pub async fn session_token(&self) -> Option<String> {
        self.current_token.lock().await.clone()
    }

    async fn mint_token(&self, member_id: &MemberId) -> Result<(), AuthError> {
        let token = Uuid::new_v4().simple().to_string();
        self.store
            .insert_auth_token(
                &token,
                member_id,
                Utc::now() + Duration::hours(TOKEN_TTL_HOURS),
            )
            .await
            .map_err(unavailable)?;
        *self.current_token.lock().await = Some(token);
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for DurableIdentityProvider {
    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Member, AuthError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakCredential);
        }
        if self
            .store
            .credentials_by_email(email)
            .await
            .map_err(unavailable)?
            .is_some()
        {
            return Err(AuthError::DuplicateEmail);
        }

        // Member and credentials land in one transaction; a failure on
        // either insert leaves no half-created account behind.
        let salt = Uuid::new_v4().simple().to_string();
        let digest = hash_password(&salt, password);
        let member = self
            .store
            .create_member_with_credentials(
                NewMember {
                    email: email.to_string(),
                    full_name: full_name.to_string(),
                    phone: None,
                    organization_id: None,
                    role: Role::Member,
                    status: AccountStatus::Active,
                    bio: None,
                    avatar_url: None,
                    location: None,
                },
                &salt,
                &digest,
            )
            .await
            .map_err(|err| {
                // The UNIQUE constraint backstops the pre-check under races.
                if format!("{err:#}").contains("UNIQUE") {
                    AuthError::DuplicateEmail
                } else {
                    unavailable(err)
                }
            })?;

        self.mint_token(&member.member_id).await?;
        Ok(member)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Member, AuthError> {
        let Some(credentials) = self
            .store
            .credentials_by_email(email)
            .await
            .map_err(unavailable)?
        else {
            return Err(AuthError::InvalidCredentials);
        };
        if hash_password(&credentials.password_salt, password) != credentials.password_hash {
            return Err(AuthError::InvalidCredentials);
        }

        let member = self
            .store
            .member_by_id(&credentials.member_id)
            .await
            .map_err(unavailable)?
            .ok_or(AuthError::InvalidCredentials)?;
        if member.status == AccountStatus::Suspended {
            return Err(AuthError::AccountSuspended);
        }

        self.mint_token(&member.member_id).await?;
        Ok(member)
    }

    async fn current_identity(&self) -> Result<Option<Member>, AuthError> {
        let token = self.current_token.lock().await.clone();
        let Some(token) = token else {
            return Ok(None);
        };

        let member = self
            .store
            .member_for_token(&token)
            .await
            .map_err(unavailable)?;
        match member {
            Some(member) if member.status != AccountStatus::Suspended => Ok(Some(member)),
            // Expired, revoked or suspended: drop the stale token.
            _ => {
                *self.current_token.lock().await = None;
                Ok(None)
            }
        }
    }

    async fn revoke(&self) -> Result<(), AuthError> {
        let token = self.current_token.lock().await.take();
        if let Some(token) = token {
            self.store.revoke_token(&token).await.map_err(unavailable)?;
        }
        Ok(())
    }
}

fn unavailable(err: anyhow::Error) -> AuthError {
    AuthError::ProviderUnavailable(err.to_string())
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}
