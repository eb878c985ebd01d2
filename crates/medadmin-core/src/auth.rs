use parking_lot::RwLock;

/// Read-only view of the signed-in user.
///
/// Stores use it to tell "my message" from "their message" and to
/// authorize REST and hub calls.
pub trait AuthContext: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
    fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
struct Credentials {
    user_id: Option<String>,
    token: Option<String>,
}

/// Auth context backed by in-memory credentials, set on login and cleared on logout.
#[derive(Debug, Default)]
pub struct SessionAuth {
    inner: RwLock<Credentials>,
}

impl SessionAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        let auth = Self::new();
        auth.login(user_id, token);
        auth
    }

    pub fn login(&self, user_id: impl Into<String>, token: impl Into<String>) {
        let mut creds = self.inner.write();
        creds.user_id = Some(user_id.into());
        creds.token = Some(token.into());
    }

    pub fn logout(&self) {
        *self.inner.write() = Credentials::default();
    }
}

impl AuthContext for SessionAuth {
    fn current_user_id(&self) -> Option<String> {
        self.inner.read().user_id.clone()
    }

    /// Empty tokens are reported as absent.
    fn token(&self) -> Option<String> {
        self.inner
            .read()
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_logout() {
        let auth = SessionAuth::new();
        assert!(auth.token().is_none());

        auth.login("user-1", "abc");
        assert_eq!(auth.current_user_id().as_deref(), Some("user-1"));
        assert_eq!(auth.token().as_deref(), Some("abc"));

        auth.logout();
        assert!(auth.current_user_id().is_none());
        assert!(auth.token().is_none());
    }

    #[test]
    fn test_blank_token_is_absent() {
        let auth = SessionAuth::with_credentials("user-1", "   ");
        assert!(auth.token().is_none());
        assert_eq!(auth.current_user_id().as_deref(), Some("user-1"));
    }
}
