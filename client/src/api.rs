//! The typed HTTPS client: pinned server certificate, bearer token and a
//! fresh request id on every call.

use apollo_lib::{
    api::{
        ErrorBody, NodeListItem, NodeStateRequest, NodeTokenResponse, PutQueueResponse,
        PutTaskResponse, PutUnmanagedNodeRequest, Queue, QueueListItem, TaskListItem, TaskSpec,
        REQUEST_ID_HEADER, TOKEN_HEADER,
    },
    conn::ConnectionInfo,
    ids::random_id,
};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::ClientError;

/// Accepts `host:port` as well as full `http(s)://` URLs, normalised to a
/// base the API paths can be joined onto.
pub fn base_url(host: &str) -> Result<Url, ClientError> {
    let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|_| ClientError::Config(format!("invalid server address: {host}")))?;
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl ApiClient {
    /// Connections are reused across calls to avoid repeated TLS
    /// handshakes; only the certificate from the connection token is
    /// trusted.
    pub fn connect(info: &ConnectionInfo) -> Result<Self, ClientError> {
        let certificate = reqwest::Certificate::from_der(&info.cert_der).map_err(|_| {
            ClientError::Config("failed to parse the certificate in the connection token".into())
        })?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .add_root_certificate(certificate)
            .build()?;

        Ok(Self {
            http,
            base: base_url(&info.host)?,
            token: info.auth_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let url = self
            .base
            .join(path)
            .map_err(|_| ClientError::Config(format!("invalid API path: {path}")))?;
        Ok(self
            .http
            .request(method, url)
            .header(TOKEN_HEADER, self.token.as_str())
            .header(REQUEST_ID_HEADER, random_id()))
    }

    /// Decode a response, turning non-2xx statuses into the structured
    /// error carried in the body.
    pub async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(ClientError::Api {
                code: body.code,
                message: body.message,
                request_id: body.request_id,
            }),
            Err(_) => Err(ClientError::Api {
                code: status.as_u16(),
                message: "unstructured server error".to_string(),
                request_id: String::new(),
            }),
        }
    }

    async fn expect_ok(response: Response) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(ClientError::Api {
                code: body.code,
                message: body.message,
                request_id: body.request_id,
            }),
            Err(_) => Err(ClientError::Api {
                code: status.as_u16(),
                message: "unstructured server error".to_string(),
                request_id: String::new(),
            }),
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        Self::expect_ok(self.request(Method::GET, "ping")?.send().await?).await
    }

    pub async fn get_node_token(&self, node_id: &str) -> Result<NodeTokenResponse, ClientError> {
        let response = self
            .request(Method::GET, "node-token")?
            .query(&[("node_id", node_id)])
            .send()
            .await?;
        Self::decode_response(response).await
    }

    pub async fn put_task(&self, task: &TaskSpec) -> Result<PutTaskResponse, ClientError> {
        let response = self.request(Method::PUT, "task")?.json(task).send().await?;
        Self::decode_response(response).await
    }

    pub async fn list_tasks(
        &self,
        queue: Option<&str>,
        job: Option<&str>,
        ids: &[String],
        with_env: bool,
    ) -> Result<Vec<TaskListItem>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(queue) = queue {
            query.push(("queue", queue.to_string()));
        }
        if let Some(job) = job {
            query.push(("job", job.to_string()));
        }
        if !ids.is_empty() {
            query.push(("id", ids.join(",")));
        }
        if with_env {
            query.push(("with_env", "true".to_string()));
        }

        let response = self
            .request(Method::GET, "task")?
            .query(&query)
            .send()
            .await?;
        Self::decode_response(response).await
    }

    pub async fn put_queue(&self, queue: &Queue) -> Result<PutQueueResponse, ClientError> {
        let response = self
            .request(Method::PUT, "queue")?
            .json(queue)
            .send()
            .await?;
        Self::decode_response(response).await
    }

    pub async fn list_queues(&self, name: Option<&str>) -> Result<Vec<QueueListItem>, ClientError> {
        let mut request = self.request(Method::GET, "queue")?;
        if let Some(name) = name {
            request = request.query(&[("queue", name)]);
        }
        Self::decode_response(request.send().await?).await
    }

    pub async fn delete_queue(&self, name: &str) -> Result<(), ClientError> {
        let response = self
            .request(Method::DELETE, "queue")?
            .query(&[("queue", name)])
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    pub async fn put_unmanaged_node(
        &self,
        node: &PutUnmanagedNodeRequest,
    ) -> Result<(), ClientError> {
        let response = self
            .request(Method::PUT, "unmanaged-node")?
            .json(node)
            .send()
            .await?;
        Self::expect_ok(response).await
    }

    pub async fn list_nodes(
        &self,
        node_id: Option<&str>,
        queue_name: Option<&str>,
    ) -> Result<Vec<NodeListItem>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(node_id) = node_id {
            query.push(("node_id", node_id.to_string()));
        }
        if let Some(queue_name) = queue_name {
            query.push(("queue_name", queue_name.to_string()));
        }
        let response = self
            .request(Method::GET, "node")?
            .query(&query)
            .send()
            .await?;
        Self::decode_response(response).await
    }

    pub async fn post_node_state(&self, state: &NodeStateRequest) -> Result<(), ClientError> {
        let response = self
            .request(Method::POST, "node-state")?
            .json(state)
            .send()
            .await?;
        Self::expect_ok(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalisation() {
        assert_eq!(
            base_url("apollo.example.com:9443").unwrap().as_str(),
            "https://apollo.example.com:9443/"
        );
        assert_eq!(
            base_url("http://somewhere.com").unwrap().as_str(),
            "http://somewhere.com/"
        );
        assert!(base_url("").is_err());
    }
}
