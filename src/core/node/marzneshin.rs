//! Marzneshin dialect (§4.B): same wire shape as rustneshin except the
//! list-users username filter is a repeated query parameter.

use super::neshin::{NeshinClient, UsernameFilterStyle};
use crate::core::domain::NodeKind;

pub struct MarzneshinClient(NeshinClient);

impl MarzneshinClient {
    #[must_use]
    pub fn new(host: String) -> Self {
        Self(NeshinClient::new(host, NodeKind::Marzneshin, UsernameFilterStyle::RepeatedParam))
    }
}

impl std::ops::Deref for MarzneshinClient {
    type Target = NeshinClient;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait::async_trait]
impl super::NodeClient for MarzneshinClient {
    fn kind(&self) -> NodeKind {
        self.0.kind()
    }

    async fn login(&self, username: &str, password: &str) -> crate::error::Result<String> {
        self.0.login(username, password).await
    }

    async fn get_inbounds_or_services(&self, token: &str) -> crate::error::Result<Vec<super::ConfigEntry>> {
        self.0.get_inbounds_or_services(token).await
    }

    async fn get_user(&self, server_key: &str, token: &str) -> crate::error::Result<Option<super::UserView>> {
        self.0.get_user(server_key, token).await
    }

    async fn list_users(&self, token: &str, page: u32, size: u32) -> crate::error::Result<Vec<super::UserView>> {
        self.0.list_users(token, page, size).await
    }

    async fn create_user(&self, desired: &super::DesiredUser, token: &str) -> crate::error::Result<super::UserView> {
        self.0.create_user(desired, token).await
    }

    async fn update_user(
        &self,
        server_key: &str,
        desired: &super::DesiredUser,
        token: &str,
    ) -> crate::error::Result<super::UserView> {
        self.0.update_user(server_key, desired, token).await
    }

    async fn delete_user(&self, server_key: &str, token: &str) -> crate::error::Result<()> {
        self.0.delete_user(server_key, token).await
    }

    async fn activate_user(&self, server_key: &str, token: &str) -> crate::error::Result<()> {
        self.0.activate_user(server_key, token).await
    }

    async fn deactivate_user(&self, server_key: &str, token: &str) -> crate::error::Result<()> {
        self.0.deactivate_user(server_key, token).await
    }

    async fn reset_user(&self, server_key: &str, token: &str) -> crate::error::Result<()> {
        self.0.reset_user(server_key, token).await
    }

    async fn revoke_sub(&self, desired: &super::DesiredUser, token: &str) -> crate::error::Result<super::UserView> {
        self.0.revoke_sub(desired, token).await
    }

    async fn users_count(&self, token: &str) -> crate::error::Result<u64> {
        self.0.users_count(token).await
    }

    async fn links_for(&self, user: &super::UserView, token: &str) -> crate::error::Result<Vec<String>> {
        self.0.links_for(user, token).await
    }

    fn parse_scripted_users(&self, body: &str) -> crate::error::Result<Vec<super::UserView>> {
        self.0.parse_scripted_users(body)
    }
}
