use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};
use tracing::warn;

use crate::observability::AUTH_FAILURES_TOTAL;

/// Login gate: one configured user with a cleartext password.
#[derive(Debug)]
pub struct LodgeAuthSource {
    user: String,
    password: String,
}

impl LodgeAuthSource {
    pub fn new(user: String, password: String) -> Self {
        Self { user, password }
    }

    fn accepts_user(&self, user: Option<&str>) -> bool {
        user == Some(self.user.as_str())
    }
}

#[async_trait]
impl AuthSource for LodgeAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user();
        if !self.accepts_user(user) {
            let user = user.unwrap_or_default().to_string();
            warn!("login rejected for unknown user {user:?}");
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::InvalidPassword(user));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
