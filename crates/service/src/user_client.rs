// HTTP client for the remote user service

use async_trait::async_trait;
use expense_core::UserRecord;
use reqwest::Url;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    /// Connection, TLS or read failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("user service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Success status with a body that is not a user record
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The configured base URL cannot address a user resource
    #[error("invalid user service url: {0}")]
    InvalidUrl(String),
}

/// Lookup of user records in the remote user service
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, user_id: i64) -> Result<UserRecord, DirectoryError>;

    async fn get_user_by_username(&self, username: &str) -> Result<UserRecord, DirectoryError>;
}

/// [`UserDirectory`] over the user service's REST API
///
/// `GET {base}/user/{id}` and `GET {base}/user/username/{name}`.
pub struct HttpUserDirectory {
    base_url: String,
    http: reqwest::Client,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL extended by `segments`, each percent-encoded as one path
    /// segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| DirectoryError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| DirectoryError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch(&self, segments: &[&str]) -> Result<UserRecord, DirectoryError> {
        let url = self.endpoint(segments)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| DirectoryError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn get_user_by_id(&self, user_id: i64) -> Result<UserRecord, DirectoryError> {
        self.fetch(&["user", &user_id.to_string()]).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<UserRecord, DirectoryError> {
        self.fetch(&["user", "username", username]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_user_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/7"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 7, "username": "alice", "role": "USER"})),
            )
            .mount(&server)
            .await;

        let directory = HttpUserDirectory::new(&format!("{}/", server.uri()));
        let user = directory.get_user_by_id(7).await.unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_get_user_by_username() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/username/bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "username": "bob"})))
            .mount(&server)
            .await;

        let directory = HttpUserDirectory::new(&server.uri());
        assert_eq!(directory.get_user_by_username("bob").await.unwrap().id, 9);
    }

    #[tokio::test]
    async fn test_username_is_encoded_as_one_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/username/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 11, "username": "a/b?c#d"})))
            .expect(1)
            .mount(&server)
            .await;

        let directory = HttpUserDirectory::new(&server.uri());
        let user = directory.get_user_by_username("a/b?c#d").await.unwrap();
        assert_eq!(user.id, 11);
    }

    #[tokio::test]
    async fn test_base_path_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/user/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3})))
            .mount(&server)
            .await;

        let directory = HttpUserDirectory::new(&format!("{}/api/v1/", server.uri()));
        assert_eq!(directory.get_user_by_id(3).await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_unusable_base_url() {
        let directory = HttpUserDirectory::new("not a url");
        assert!(matches!(
            directory.get_user_by_id(1).await.unwrap_err(),
            DirectoryError::InvalidUrl(_)
        ));

        let directory = HttpUserDirectory::new("mailto:users@example.com");
        assert!(matches!(
            directory.get_user_by_id(1).await.unwrap_err(),
            DirectoryError::InvalidUrl(_)
        ));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/404"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such user"))
            .mount(&server)
            .await;

        let directory = HttpUserDirectory::new(&server.uri());
        assert_eq!(
            directory.get_user_by_id(404).await.unwrap_err(),
            DirectoryError::Status {
                status: 404,
                body: "no such user".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let directory = HttpUserDirectory::new(&server.uri());
        assert!(matches!(
            directory.get_user_by_id(1).await.unwrap_err(),
            DirectoryError::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let directory = HttpUserDirectory::new(&uri);
        assert!(matches!(
            directory.get_user_by_id(1).await.unwrap_err(),
            DirectoryError::Transport(_)
        ));
    }
}
