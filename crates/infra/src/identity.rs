//! Identity service: accounts, login, refresh.
//!
//! Accounts are the source of truth for roles. They change only through
//! admin action or the role-assignment consumer; login and refresh mint
//! tokens from the current role set.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use clubhub_auth::{
    IssuedTokens, PasswordHash, RefreshToken, Role, TokenError, TokenService, UserAccount,
    normalize_email,
};
use clubhub_core::{DomainError, UserId};
use clubhub_events::{Fact, Publisher, UserRegistered, publish_fact};

use crate::store::{Repository, RepositoryError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("an account already exists for {0}")]
    DuplicateEmail(String),

    /// Unknown e-mail, wrong password and suspended account all look alike.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<DomainError> for IdentityError {
    fn from(value: DomainError) -> Self {
        Self::Validation(value.to_string())
    }
}

pub struct IdentityService {
    users: Arc<dyn Repository<UserAccount>>,
    tokens: Arc<TokenService>,
    publisher: Arc<dyn Publisher>,
    bcrypt_cost: u32,
    // Serialises the duplicate-e-mail check with the insert.
    registration: Mutex<()>,
}

impl core::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityService")
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish_non_exhaustive()
    }
}

impl IdentityService {
    pub fn new(
        users: Arc<dyn Repository<UserAccount>>,
        tokens: Arc<TokenService>,
        publisher: Arc<dyn Publisher>,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            users,
            tokens,
            publisher,
            bcrypt_cost,
            registration: Mutex::new(()),
        }
    }

    pub fn users(&self) -> &Arc<dyn Repository<UserAccount>> {
        &self.users
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Create a student account and announce it on `user.registered`.
    #[instrument(skip(self, password), fields(email = %email))]
    pub fn register(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<UserAccount, IdentityError> {
        self.register_at(email, display_name, password, Utc::now())
    }

    pub fn register_at(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, IdentityError> {
        let hash = PasswordHash::hash(password, self.bcrypt_cost)?;
        let account = UserAccount::register(UserId::new(), email, display_name, hash, now)?;

        {
            let _guard = self
                .registration
                .lock()
                .map_err(|_| RepositoryError::Unavailable("registration lock poisoned".into()))?;
            if self.find_by_email(&account.email)?.is_some() {
                return Err(IdentityError::DuplicateEmail(account.email));
            }
            self.users.save(account.clone())?;
        }

        info!(user_id = %account.id, "user registered");
        publish_fact(
            &*self.publisher,
            &Fact::UserRegistered(UserRegistered {
                user_id: account.id,
                email: account.email.clone(),
                display_name: account.display_name.clone(),
            }),
        );
        Ok(account)
    }

    #[instrument(skip(self, password), fields(email = %email))]
    pub fn login(&self, email: &str, password: &str) -> Result<IssuedTokens, IdentityError> {
        self.login_at(email, password, Utc::now())
    }

    pub fn login_at(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, IdentityError> {
        let Some(account) = self.find_by_email(email)? else {
            return Err(IdentityError::InvalidCredentials);
        };
        if !account.check_password(password) {
            warn!(user_id = %account.id, "login rejected");
            return Err(IdentityError::InvalidCredentials);
        }
        Ok(self.tokens.issue_at(&account.identity(), now)?)
    }

    /// Rotate a refresh id. Roles are re-read from the account, so changes
    /// applied since login show up in the new access token.
    pub fn refresh(&self, refresh_token: &RefreshToken) -> Result<IssuedTokens, IdentityError> {
        self.refresh_at(refresh_token, Utc::now())
    }

    pub fn refresh_at(
        &self,
        refresh_token: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<IssuedTokens, IdentityError> {
        let users = &self.users;
        let issued = self.tokens.rotate_at(refresh_token, now, |user_id| {
            users
                .find_by_id(&user_id)
                .ok()
                .flatten()
                .filter(UserAccount::can_authenticate)
                .map(|account| account.identity())
        })?;
        Ok(issued)
    }

    /// Make sure an admin account exists for `email`, creating it if needed.
    /// An existing account keeps its password and gains `ROLE_ADMIN`.
    pub fn ensure_admin(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<UserAccount, IdentityError> {
        let mut account = match self.find_by_email(email)? {
            Some(existing) => existing,
            None => self.register(email, display_name, password)?,
        };
        if account.grant_role(Role::Admin) {
            self.users.save(account.clone())?;
            info!(user_id = %account.id, "bootstrap admin granted");
        }
        Ok(account)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, IdentityError> {
        let Ok(wanted) = normalize_email(email) else {
            return Ok(None);
        };
        Ok(self.users.list()?.into_iter().find(|u| u.email == wanted))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use clubhub_auth::{InMemoryRefreshStore, TokenConfig};
    use clubhub_events::{InMemoryBroker, Queue};

    use super::*;
    use crate::store::InMemoryRepository;

    const SECRET: &str = "RAW:identity-service-test-secret-0123456789";

    fn service() -> (IdentityService, Arc<InMemoryBroker>) {
        let broker = Arc::new(InMemoryBroker::default());
        let tokens = TokenService::from_secret_value(
            SECRET,
            TokenConfig::default(),
            Arc::new(InMemoryRefreshStore::new()),
        )
        .unwrap();
        let svc = IdentityService::new(
            Arc::new(InMemoryRepository::<UserAccount>::new()),
            Arc::new(tokens),
            broker.clone(),
            4,
        );
        (svc, broker)
    }

    #[test]
    fn register_announces_the_new_user() {
        let (svc, broker) = service();
        let account = svc.register("Ana@Campus.edu", "Ana", "correct horse").unwrap();
        assert_eq!(account.email, "ana@campus.edu");
        assert!(account.roles.contains(Role::Student));
        assert_eq!(broker.depth(Queue::UserDirectory), 1);
    }

    #[test]
    fn duplicate_email_is_refused() {
        let (svc, _) = service();
        svc.register("ana@campus.edu", "Ana", "correct horse").unwrap();
        let err = svc.register("ANA@campus.edu", "Other", "correct horse").unwrap_err();
        assert!(matches!(err, IdentityError::DuplicateEmail(_)));
    }

    #[test]
    fn login_checks_the_password() {
        let (svc, _) = service();
        svc.register("ana@campus.edu", "Ana", "correct horse").unwrap();

        assert_eq!(
            svc.login("ana@campus.edu", "wrong horse").unwrap_err(),
            IdentityError::InvalidCredentials
        );
        assert_eq!(
            svc.login("nobody@campus.edu", "correct horse").unwrap_err(),
            IdentityError::InvalidCredentials
        );

        let issued = svc.login("ana@campus.edu", "correct horse").unwrap();
        let principal = svc.tokens().verify(&issued.access_token).unwrap();
        assert_eq!(principal.subject, "ana@campus.edu");
    }

    #[test]
    fn refresh_picks_up_role_changes() {
        let (svc, _) = service();
        let mut account = svc.register("ana@campus.edu", "Ana", "correct horse").unwrap();
        let now = Utc::now();
        let issued = svc.login_at("ana@campus.edu", "correct horse", now).unwrap();

        account.grant_role(Role::ClubPresident);
        svc.users().save(account).unwrap();

        let rotated = svc
            .refresh_at(&issued.refresh_token, now + Duration::seconds(5))
            .unwrap();
        let principal = svc.tokens().verify(&rotated.access_token).unwrap();
        assert!(principal.roles.contains(Role::ClubPresident));

        // the old refresh id was consumed
        assert!(svc.refresh(&issued.refresh_token).is_err());
    }

    #[test]
    fn suspended_accounts_cannot_log_in() {
        let (svc, _) = service();
        let mut account = svc.register("ana@campus.edu", "Ana", "correct horse").unwrap();
        account.suspend();
        svc.users().save(account).unwrap();
        assert_eq!(
            svc.login("ana@campus.edu", "correct horse").unwrap_err(),
            IdentityError::InvalidCredentials
        );
    }

    #[test]
    fn ensure_admin_is_repeatable() {
        let (svc, _) = service();
        svc.register("root@campus.edu", "Root", "first password").unwrap();
        let admin = svc.ensure_admin("root@campus.edu", "Root", "ignored").unwrap();
        assert!(admin.roles.contains(Role::Admin));
        svc.ensure_admin("root@campus.edu", "Root", "ignored").unwrap();

        assert_eq!(svc.users().list().unwrap().len(), 1);
        assert!(svc.login("root@campus.edu", "first password").is_ok());
    }
}
