#![cfg(not(tarpaulin_include))]

#[cfg(feature = "web")]
use crate::app::{ApiError, SharedState};
use crate::error::AuthError;
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Json,
    extract::{FromRequestParts, Path as AxumPath, State},
    http::{StatusCode, request::Parts},
};
#[cfg(feature = "web")]
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

lazy_static! {
    static ref USERNAME: Regex = Regex::new(r"^[A-Za-z0-9_.@-]{1,64}$").unwrap();
}

/// Access level of an account
///
/// Only `admin` is checked by the API today; the other roles are carried through
/// login so clients can tailor their views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Validator,
    Business,
    Plant,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Validator => "validator",
            Role::Business => "business",
            Role::Plant => "plant",
            Role::User => "user",
        }
    }
}

/// User data structure representing a registered account
///
/// Stored in the users JSON file keyed by username.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Argon2id hash of the user's password, keyed with the server secret
    pub password_hash: String,

    /// Requested or assigned role
    pub role: Role,

    /// False until an administrator approves the account
    pub is_active: bool,

    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// Public view of an account, without the password hash.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserOut {
    pub username: String,
    pub role: Role,
    pub is_active: bool,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
            is_active: user.is_active,
        }
    }
}

/// Credential data for login and registration
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    /// Username for login/registration
    pub username: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,

    /// Requested role; registration only, defaults to `user`
    #[serde(default)]
    pub role: Option<Role>,
}

/// Successful login response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub role: Role,
}

/// File-backed user accounts
///
/// The whole file is read at open and rewritten after every change. Passwords are
/// hashed with Argon2id keyed with the server secret, so a leaked users file is not
/// enough to mount an offline attack without the secret as well.
#[derive(Debug)]
pub struct UserDirectory {
    path: PathBuf,
    secret: Vec<u8>,
    params: Params,
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    /// Open the user database, creating an empty one if needed
    ///
    /// # Arguments
    /// * `path` - Path of the users JSON file
    /// * `secret` - Server secret mixed into password hashes
    ///
    /// # Returns
    /// * `Result<UserDirectory, AuthError>` - The directory or a storage error
    pub fn open(path: &Path, secret: &str) -> Result<Self, AuthError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        if !path.exists() {
            fs::write(path, b"{}").map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        let contents = fs::read_to_string(path).map_err(|e| AuthError::Storage(e.to_string()))?;
        let users: HashMap<String, User> = serde_json::from_str(&contents)
            .map_err(|e| AuthError::Storage(format!("Failed to parse users data: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            secret: secret.as_bytes().to_vec(),
            params: Params::default(),
            users: RwLock::new(users),
        })
    }

    /// Use different Argon2 cost parameters for new hashes.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Register a new account awaiting approval
    ///
    /// # Errors
    /// * [`AuthError::InvalidInput`] for an empty password, a malformed username or the
    ///   `admin` role, which only [`UserDirectory::provision_admin`] grants
    /// * [`AuthError::UsernameTaken`] if the username exists
    pub fn register(&self, username: &str, password: &str, role: Role) -> Result<UserOut, AuthError> {
        validate(username, password)?;
        if role == Role::Admin {
            return Err(AuthError::InvalidInput(
                "The admin role cannot be requested at registration".to_string(),
            ));
        }
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(username) {
            return Err(AuthError::UsernameTaken);
        }

        let user = User {
            username: username.to_string(),
            password_hash: self.hash_password(password)?,
            role,
            is_active: false,
            created_at: Utc::now(),
        };
        let out = UserOut::from(&user);
        users.insert(username.to_string(), user);
        self.save(&users)?;
        info!("Registered {} as {} (pending approval)", username, role.as_str());
        Ok(out)
    }

    /// Create an active administrator, or promote, activate and reset an existing account.
    pub fn provision_admin(&self, username: &str, password: &str) -> Result<UserOut, AuthError> {
        validate(username, password)?;
        let password_hash = self.hash_password(password)?;
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let user = users.entry(username.to_string()).or_insert_with(|| User {
            username: username.to_string(),
            password_hash: String::new(),
            role: Role::Admin,
            is_active: true,
            created_at: Utc::now(),
        });
        user.password_hash = password_hash;
        user.role = Role::Admin;
        user.is_active = true;
        let out = UserOut::from(&*user);
        self.save(&users)?;
        info!("Administrator {} is ready", username);
        Ok(out)
    }

    /// Verify credentials
    ///
    /// # Errors
    /// * [`AuthError::InvalidCredentials`] for an unknown user or wrong password; the
    ///   two cases are indistinguishable to the caller
    /// * [`AuthError::PendingApproval`] for correct credentials on an inactive account
    pub fn authenticate(&self, username: &str, password: &str) -> Result<UserOut, AuthError> {
        let user = {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            users.get(username).cloned()
        };
        let Some(user) = user else {
            warn!("Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        };
        if !self.verify_password(password, &user.password_hash)? {
            warn!("Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::PendingApproval);
        }
        Ok(UserOut::from(&user))
    }

    /// Accounts awaiting approval, oldest first.
    pub fn pending(&self) -> Vec<UserOut> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let mut pending: Vec<&User> = users.values().filter(|u| !u.is_active).collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.username.cmp(&b.username)));
        pending.into_iter().map(UserOut::from).collect()
    }

    /// Activate an account.
    pub fn approve(&self, username: &str) -> Result<UserOut, AuthError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let user = users
            .get_mut(username)
            .ok_or_else(|| AuthError::UnknownUser(username.to_string()))?;
        user.is_active = true;
        let out = UserOut::from(&*user);
        self.save(&users)?;
        info!("Approved {}", username);
        Ok(out)
    }

    pub fn get(&self, username: &str) -> Option<UserOut> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.get(username).map(UserOut::from)
    }

    fn save(&self, users: &HashMap<String, User>) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|_| AuthError::Storage("Failed to serialize users data".to_string()))?;
        fs::write(&self.path, json)
            .map_err(|_| AuthError::Storage("Failed to write users data".to_string()))
    }

    fn hasher(&self) -> Result<Argon2<'_>, AuthError> {
        if self.secret.is_empty() {
            return Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone()));
        }
        Argon2::new_with_secret(&self.secret, Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| AuthError::Storage("Password hashing failed".to_string()))
    }

    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|_| AuthError::Storage("Invalid password hash format".to_string()))?;
        Ok(self
            .hasher()?
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

fn validate(username: &str, password: &str) -> Result<(), AuthError> {
    if !USERNAME.is_match(username) {
        return Err(AuthError::InvalidInput(
            "Username must be 1-64 letters, digits or . _ @ -".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("Password cannot be empty".to_string()));
    }
    Ok(())
}

/// User session data
#[derive(Debug, Clone)]
pub struct Session {
    /// Username of the authenticated user
    pub username: String,

    /// Role at login time
    pub role: Role,

    /// Time when the session expires
    pub expires_at: DateTime<Utc>,
}

/// Bearer tokens issued at login.
#[derive(Debug)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Session>>,
    lifetime: Duration,
}

impl SessionTable {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Create a session and return its token. Expired sessions are purged on the way.
    pub fn create(&self, user: &UserOut) -> String {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            username: user.username.clone(),
            role: user.role,
            expires_at: now
                .checked_add_signed(self.lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), session);
        token
    }

    /// The session for a token, if it exists and has not expired.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(token)
            .filter(|session| session.expires_at > Utc::now())
            .cloned()
    }

    pub fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(token).is_some()
    }
}

// Web handler functions below (only compiled with "web" feature)

/// The authenticated caller, taken from the `Authorization: Bearer` header.
#[cfg(feature = "web")]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub role: Role,
    pub token: String,
}

#[cfg(feature = "web")]
impl AuthUser {
    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AuthError::Forbidden.into())
        }
    }
}

#[cfg(feature = "web")]
#[axum::async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::from(AuthError::Unauthenticated))?;
        let token = bearer.token().to_string();
        let session = state
            .sessions
            .validate(&token)
            .ok_or(AuthError::Unauthenticated)?;
        Ok(AuthUser {
            username: session.username,
            role: session.role,
            token,
        })
    }
}

/// Handle account registration
///
/// New accounts start inactive and cannot log in until an administrator approves them.
#[cfg(feature = "web")]
pub async fn handle_register(
    State(state): State<SharedState>,
    Json(credentials): Json<UserCredentials>,
) -> Result<(StatusCode, Json<UserOut>), ApiError> {
    let role = credentials.role.unwrap_or(Role::User);
    let user = state
        .users
        .register(&credentials.username, &credentials.password, role)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Handle user login requests
///
/// # Returns
/// * `Json<TokenResponse>` - a bearer token valid for the configured session lifetime
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<SharedState>,
    Json(credentials): Json<UserCredentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .users
        .authenticate(&credentials.username, &credentials.password)?;
    let access_token = state.sessions.create(&user);
    info!("{} logged in", user.username);
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        role: user.role,
    }))
}

/// Handle user logout by revoking the presented token.
#[cfg(feature = "web")]
pub async fn handle_logout(State(state): State<SharedState>, user: AuthUser) -> StatusCode {
    state.sessions.revoke(&user.token);
    StatusCode::NO_CONTENT
}

#[cfg(feature = "web")]
pub async fn handle_me(State(state): State<SharedState>, user: AuthUser) -> Result<Json<UserOut>, ApiError> {
    state
        .users
        .get(&user.username)
        .map(Json)
        .ok_or_else(|| AuthError::UnknownUser(user.username).into())
}

/// List accounts awaiting approval (admin only).
#[cfg(feature = "web")]
pub async fn list_pending_users(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<Vec<UserOut>>, ApiError> {
    user.require(Role::Admin)?;
    Ok(Json(state.users.pending()))
}

/// Approve a pending account (admin only).
#[cfg(feature = "web")]
pub async fn approve_user(
    State(state): State<SharedState>,
    user: AuthUser,
    AxumPath(username): AxumPath<String>,
) -> Result<Json<UserOut>, ApiError> {
    user.require(Role::Admin)?;
    Ok(Json(state.users.approve(&username)?))
}
