use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Single shared password for every user and tenant.
#[derive(Debug)]
pub struct SlotbookAuthSource {
    password: String,
}

impl SlotbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SlotbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!(user = ?login.user(), database = ?login.database(), "password lookup");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
