use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use otpgate::crypto::transport::encrypt_for_transport;
use otpgate::db::{Category, IdentityDescriptor};
use otpgate::web::schemas::{
    MessageResponse, PublicKeyResponse, ReaderResponse, VerifyResponse,
};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::json;

/// HTTP client for the controller API.
pub struct ControllerClient {
    pub base_url: String,
    http: reqwest::Client,
}

impl ControllerClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/controller/users/{username}[/trailing...]` with the name encoded as
    /// a single path segment.
    fn user_url(&self, username: &str, trailing: &[&str]) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("controller URL cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["controller", "users", username])
            .extend(trailing);
        Ok(url)
    }

    /// Decode a JSON body, turning the controller's `{error, code}` body into an error.
    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let message = body["error"].as_str().unwrap_or("no error message");
            return Err(anyhow!("controller returned {}: {}", status, message));
        }
        Ok(resp.json().await?)
    }

    pub async fn public_key(&self) -> anyhow::Result<String> {
        let resp = self.http.get(self.url("/controller/public-key")).send().await?;
        let body: PublicKeyResponse = Self::read(resp).await?;
        Ok(body.public_key)
    }

    pub async fn create_user(
        &self,
        username: &str,
        category: Category,
    ) -> anyhow::Result<IdentityDescriptor> {
        let resp = self
            .http
            .post(self.url("/controller/users"))
            .json(&json!({ "username": username, "user_type": category }))
            .send()
            .await?;
        Self::read(resp).await
    }

    /// Encrypt `secret` under the controller's transport key and upload it.
    pub async fn provision(
        &self,
        username: &str,
        secret: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<MessageResponse> {
        let public_key = self.public_key().await?;
        let ciphertext = encrypt_for_transport(&public_key, secret.as_bytes())
            .context("failed to encrypt secret for transport")?;

        let resp = self
            .http
            .post(self.url("/controller/users/encrypted-secret"))
            .json(&json!({
                "username": username,
                "encrypted_secret": BASE64.encode(ciphertext),
                "secret_expires_at": expires_at,
            }))
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn verify(&self, username: &str, code: &str) -> anyhow::Result<VerifyResponse> {
        let resp = self
            .http
            .post(self.url("/controller/verify"))
            .json(&json!({ "username": username, "totp_code": code }))
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn resolve(&self, code: &str, method: &str) -> anyhow::Result<ReaderResponse> {
        let resp = self
            .http
            .post(self.url("/reader/verify-code"))
            .json(&json!({ "code": code, "method": method }))
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn list(&self) -> anyhow::Result<Vec<IdentityDescriptor>> {
        let resp = self.http.get(self.url("/controller/users")).send().await?;
        Self::read(resp).await
    }

    pub async fn revoke(&self, username: &str) -> anyhow::Result<MessageResponse> {
        let resp = self
            .http
            .delete(self.user_url(username, &["secret"])?)
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn delete(&self, username: &str) -> anyhow::Result<MessageResponse> {
        let resp = self
            .http
            .delete(self.user_url(username, &[])?)
            .send()
            .await?;
        Self::read(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = ControllerClient::new("http://127.0.0.1:8000/".to_string());
        assert_eq!(client.base_url, "http://127.0.0.1:8000");
        assert_eq!(
            client.url("/controller/users"),
            "http://127.0.0.1:8000/controller/users"
        );
    }

    #[test]
    fn user_url_encodes_name_as_one_segment() {
        let client = ControllerClient::new("http://127.0.0.1:8000/".to_string());

        let url = client.user_url("a/b c?#", &["secret"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8000/controller/users/a%2Fb%20c%3F%23/secret"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let url = client.user_url("alice", &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/controller/users/alice");
    }
}
