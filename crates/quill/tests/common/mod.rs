//! Test utilities and common setup.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;

use quill::api::{self, AppState};
use quill::auth::{AuthConfig, AuthState, DevUser, Role};
use quill::db::Database;
use quill::model::MockProvider;
use quill::storage::ChatRepository;
use quill::tools::ToolSet;

/// A running test application with its auth state.
pub struct TestApp {
    pub router: Router,
    pub auth: AuthState,
}

impl TestApp {
    /// Issue a bearer token for an arbitrary user.
    pub fn token(&self, user_id: &str, username: &str) -> String {
        self.auth
            .generate_token(user_id, username, Role::User)
            .unwrap()
    }
}

fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: Some("test-secret-for-integration-tests-minimum-32-chars".to_string()),
        token_ttl_secs: Some(3600),
        dev_users: vec![DevUser {
            username: "dev".to_string(),
            password_hash: bcrypt::hash("devpassword123", 4).unwrap(),
            user_id: "u-dev".to_string(),
            role: Role::User,
        }],
    }
}

fn test_uploads_dir() -> PathBuf {
    let dir = std::env::temp_dir()
        .join("quill-tests")
        .join(uuid::Uuid::new_v4().to_string());
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Create a test application around a scripted model provider.
pub async fn test_app_with_provider(provider: MockProvider) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let store = ChatRepository::new(db.pool().clone());
    let auth = AuthState::new(test_auth_config());

    let state = AppState::new(
        store,
        Arc::new(provider),
        ToolSet::builtin(None, None),
        auth.clone(),
        "mock".to_string(),
        test_uploads_dir(),
    );

    TestApp {
        router: api::create_router(state),
        auth,
    }
}

/// Create a test application with the default canned provider.
pub async fn test_app() -> TestApp {
    test_app_with_provider(MockProvider::canned()).await
}
