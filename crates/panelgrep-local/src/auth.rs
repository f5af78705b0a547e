//! Credential service: argon2 password hashing plus stateless HS256 bearer
//! tokens.
//!
//! Tokens carry only the username and an absolute expiry; validation
//! re-reads the user from the store, so a deleted account invalidates its
//! outstanding tokens on the next request. Everything fails closed: any
//! hash or signature problem maps to `InvalidCredentials`/`InvalidToken`.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use panelgrep_core::{AuthService, Error, NewUser, Result, Role, User, UserStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Backend(format!("password hashing: {e}")))
}

pub struct LocalAuthService {
    users: Arc<dyn UserStore>,
    token_ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl LocalAuthService {
    /// `secret` signs and verifies tokens; it must come from configuration
    /// or the environment, never a source literal.
    pub fn new(users: Arc<dyn UserStore>, token_ttl: Duration, secret: &str) -> Self {
        Self {
            users,
            token_ttl,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn mint_token(&self, username: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let claims = Claims {
            sub: username.to_string(),
            exp: (now + self.token_ttl).as_secs(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::Backend(format!("token signing: {e}")))
    }
}

#[async_trait::async_trait]
impl AuthService for LocalAuthService {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let user = match self.users.get_by_username(username).await? {
            Some(user) => user,
            None => {
                // Burn a hash so an unknown username costs the same as a
                // wrong password.
                let _ = hash_password(password);
                return Err(Error::InvalidCredentials);
            }
        };

        let parsed =
            PasswordHash::new(&user.password_hash).map_err(|_| Error::InvalidCredentials)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| Error::InvalidCredentials)?;

        self.mint_token(username)
    }

    async fn register(&self, author: Option<&User>, new_user: NewUser) -> Result<()> {
        let role = match new_user.role {
            Role::Undefined => Role::User,
            role => role,
        };
        if role == Role::Admin && !author.is_some_and(|a| a.role == Role::Admin) {
            return Err(Error::Forbidden("only an admin can create admins".into()));
        }

        let password_hash = hash_password(&new_user.password)?;
        self.users
            .save(&User {
                username: new_user.username,
                password_hash,
                role,
            })
            .await
    }

    async fn validate_token(&self, token: &str) -> Result<User> {
        // HS256 only; a token claiming any other algorithm fails here.
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| Error::InvalidToken(e.to_string()))?;

        match self.users.get_by_username(&data.claims.sub).await? {
            Some(user) => Ok(user),
            None => Err(Error::UserGone(data.claims.sub)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryUserStore {
        users: Mutex<BTreeMap<String, User>>,
    }

    #[async_trait::async_trait]
    impl UserStore for MemoryUserStore {
        async fn save(&self, user: &User) -> Result<()> {
            let mut users = self.users.lock().unwrap();
            if users.contains_key(&user.username) {
                return Err(Error::Backend(format!(
                    "duplicate username {}",
                    user.username
                )));
            }
            users.insert(user.username.clone(), user.clone());
            Ok(())
        }

        async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
            Ok(self.users.lock().unwrap().get(username).cloned())
        }
    }

    fn service(store: Arc<MemoryUserStore>) -> LocalAuthService {
        LocalAuthService::new(store, Duration::from_secs(600), "test-signing-secret")
    }

    fn new_user(username: &str, password: &str, role: Role) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: password.to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let store = Arc::new(MemoryUserStore::default());
        let auth = service(store.clone());

        auth.register(None, new_user("alice", "s3cretpw", Role::User))
            .await
            .unwrap();

        // The stored hash is salted; the plaintext never persists.
        let stored = store.get_by_username("alice").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "s3cretpw");
        assert!(stored.password_hash.starts_with("$argon2"));

        let token = auth.login("alice", "s3cretpw").await.unwrap();
        let user = auth.validate_token(&token).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, Role::User);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_indistinguishable() {
        let store = Arc::new(MemoryUserStore::default());
        let auth = service(store);

        auth.register(None, new_user("alice", "s3cretpw", Role::User))
            .await
            .unwrap();

        let wrong = auth.login("alice", "wrong-password").await.unwrap_err();
        let unknown = auth.login("nobody", "s3cretpw").await.unwrap_err();
        assert!(matches!(wrong, Error::InvalidCredentials));
        assert!(matches!(unknown, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn creating_an_admin_requires_an_admin_author() {
        let store = Arc::new(MemoryUserStore::default());
        let auth = service(store.clone());

        let anonymous = auth
            .register(None, new_user("eve", "password1", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(anonymous, Error::Forbidden(_)));

        auth.register(None, new_user("bob", "password1", Role::User))
            .await
            .unwrap();
        let bob = store.get_by_username("bob").await.unwrap().unwrap();
        let by_user = auth
            .register(Some(&bob), new_user("eve", "password1", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(by_user, Error::Forbidden(_)));

        let root = User {
            username: "root".to_string(),
            password_hash: hash_password("rootpass").unwrap(),
            role: Role::Admin,
        };
        store.save(&root).await.unwrap();
        auth.register(Some(&root), new_user("eve", "password1", Role::Admin))
            .await
            .unwrap();
        let eve = store.get_by_username("eve").await.unwrap().unwrap();
        assert_eq!(eve.role, Role::Admin);
    }

    #[tokio::test]
    async fn undefined_role_registers_as_plain_user() {
        let store = Arc::new(MemoryUserStore::default());
        let auth = service(store.clone());

        auth.register(None, new_user("carol", "password1", Role::Undefined))
            .await
            .unwrap();
        let carol = store.get_by_username("carol").await.unwrap().unwrap();
        assert_eq!(carol.role, Role::User);
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let store = Arc::new(MemoryUserStore::default());
        let auth = service(store);

        auth.register(None, new_user("alice", "s3cretpw", Role::User))
            .await
            .unwrap();
        let token = auth.login("alice", "s3cretpw").await.unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        let err = auth.validate_token(&tampered).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err}");

        let foreign = LocalAuthService::new(
            Arc::new(MemoryUserStore::default()),
            Duration::from_secs(600),
            "another-secret",
        );
        let err = foreign.validate_token(&token).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err}");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let store = Arc::new(MemoryUserStore::default());
        let auth = service(store.clone());

        auth.register(None, new_user("alice", "s3cretpw", Role::User))
            .await
            .unwrap();

        // Mint a token that expired well past any validation leeway.
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let claims = Claims {
            sub: "alice".to_string(),
            exp: now.as_secs().saturating_sub(3600),
        };
        let expired = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-signing-secret"),
        )
        .unwrap();

        let err = auth.validate_token(&expired).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken(_)), "{err}");
    }

    #[tokio::test]
    async fn token_for_a_deleted_user_reports_user_gone() {
        let store = Arc::new(MemoryUserStore::default());
        let auth = service(store.clone());

        auth.register(None, new_user("alice", "s3cretpw", Role::User))
            .await
            .unwrap();
        let token = auth.login("alice", "s3cretpw").await.unwrap();

        store.users.lock().unwrap().remove("alice");
        let err = auth.validate_token(&token).await.unwrap_err();
        assert!(matches!(err, Error::UserGone(_)), "{err}");
    }
}
