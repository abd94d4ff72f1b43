use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Client, ClientBuilder, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::filters::FilterSet;
use crate::models::{
    BookmarkPage, BookmarkResponse, Category, NewResource, ResourcePage, ResourceSummary, Tag,
    UpvoteResponse,
};

pub fn build_http_client(config: &ClientConfig) -> ClientResult<Client> {
    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent(concat!("tenx-core/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(config.request_timeout())
        .build()?;
    Ok(client)
}

#[derive(Debug, Clone)]
enum Credentials {
    Bearer(HeaderValue),
    Cookie(HeaderValue),
}

/// Thin typed wrapper over the backend REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
    credentials: Option<Credentials>,
    timeout: std::time::Duration,
}

impl ApiClient {
    pub fn new(client: Client, config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self {
            client,
            base: config.api_base()?,
            credentials: None,
            timeout: config.request_timeout(),
        })
    }

    pub fn with_bearer(mut self, token: &str) -> ClientResult<Self> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ClientError::Config(e.to_string()))?;
        self.credentials = Some(Credentials::Bearer(value));
        Ok(self)
    }

    /// Session cookie issued by the auth service.
    pub fn with_cookie(mut self, cookie: &str) -> ClientResult<Self> {
        let value = HeaderValue::from_str(cookie).map_err(|e| ClientError::Config(e.to_string()))?;
        self.credentials = Some(Credentials::Cookie(value));
        Ok(self)
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.credentials {
            Some(Credentials::Bearer(value)) => request.header(AUTHORIZATION, value.clone()),
            Some(Credentials::Cookie(value)) => request.header(COOKIE, value.clone()),
            None => request,
        }
    }

    async fn check(response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .or_else(|| value.get("error"))
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
            })
            .unwrap_or(body);
        warn!(%status, %message, "request rejected");
        Err(ClientError::Status { status, message })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = self
            .authorize(request)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn with_cursor(url: &mut Url, cursor: Option<&str>) {
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", cursor);
        }
    }

    pub async fn list_resources(
        &self,
        filters: &FilterSet,
        cursor: Option<&str>,
    ) -> ClientResult<ResourcePage> {
        let mut url = self.endpoint(&["resources"])?;
        {
            let pairs = filters.to_query_pairs();
            if !pairs.is_empty() {
                let mut query = url.query_pairs_mut();
                for (key, value) in pairs {
                    query.append_pair(key, &value);
                }
            }
        }
        Self::with_cursor(&mut url, cursor);
        debug!(%url, "listing resources");
        self.send_json(self.client.get(url)).await
    }

    pub async fn search(&self, query: &str, cursor: Option<&str>) -> ClientResult<ResourcePage> {
        let mut url = self.endpoint(&["search"])?;
        url.query_pairs_mut().append_pair("query", query);
        Self::with_cursor(&mut url, cursor);
        self.send_json(self.client.get(url)).await
    }

    pub async fn get_resource(&self, resource_id: &str) -> ClientResult<ResourceSummary> {
        let url = self.endpoint(&["resources", resource_id])?;
        self.send_json(self.client.get(url)).await
    }

    pub async fn user_resources(&self, cursor: Option<&str>) -> ClientResult<ResourcePage> {
        let mut url = self.endpoint(&["user", "resources"])?;
        Self::with_cursor(&mut url, cursor);
        self.send_json(self.client.get(url)).await
    }

    pub async fn bookmarks(&self, cursor: Option<&str>) -> ClientResult<ResourcePage> {
        let mut url = self.endpoint(&["user", "bookmarks"])?;
        Self::with_cursor(&mut url, cursor);
        let page: BookmarkPage = self.send_json(self.client.get(url)).await?;
        Ok(page.into())
    }

    pub async fn categories(&self) -> ClientResult<Vec<Category>> {
        let url = self.endpoint(&["categories"])?;
        self.send_json(self.client.get(url)).await
    }

    pub async fn tags(&self) -> ClientResult<Vec<Tag>> {
        let url = self.endpoint(&["tags"])?;
        self.send_json(self.client.get(url)).await
    }

    pub async fn toggle_upvote(&self, resource_id: &str) -> ClientResult<UpvoteResponse> {
        let url = self.endpoint(&["resource", "upvote", resource_id])?;
        self.send_json(self.client.patch(url)).await
    }

    /// The backend does not always describe the new state; an empty or
    /// unexpected body yields an empty [`BookmarkResponse`].
    pub async fn toggle_bookmark(&self, resource_id: &str) -> ClientResult<BookmarkResponse> {
        let url = self.endpoint(&["resource", resource_id, "bookmark"])?;
        let response = self.authorize(self.client.post(url)).send().await?;
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BookmarkResponse::default());
        }
        match serde_json::from_slice(&bytes) {
            Ok(parsed) => Ok(parsed),
            Err(err) => {
                debug!(error = %err, resource_id, "bookmark response carried no state");
                Ok(BookmarkResponse::default())
            }
        }
    }

    fn resource_form(resource: &NewResource) -> ClientResult<Form> {
        let mut form = Form::new()
            .text("title", resource.title.clone())
            .text("description", resource.description.clone())
            .text("url", resource.url.clone())
            .text("resourceType", resource.resource_type.as_str())
            .text("categoryName", resource.category_name.clone())
            .text("tags", resource.tag_list().join(","));
        if let Some(image_url) = &resource.image_url {
            form = form.text("imageUrl", image_url.clone());
        }
        if let Some(image) = &resource.image {
            let part = Part::bytes(image.bytes.to_vec())
                .file_name(image.file_name.clone())
                .mime_str(&image.mime)?;
            form = form.part("image", part);
        }
        Ok(form)
    }

    pub async fn create_resource(&self, resource: &NewResource) -> ClientResult<ResourceSummary> {
        let url = self.endpoint(&["resources"])?;
        let form = Self::resource_form(resource)?;
        self.send_json(self.client.post(url).multipart(form)).await
    }

    pub async fn update_resource(
        &self,
        resource_id: &str,
        resource: &NewResource,
    ) -> ClientResult<ResourceSummary> {
        let url = self.endpoint(&["resource", resource_id])?;
        let form = Self::resource_form(resource)?;
        self.send_json(self.client.patch(url).multipart(form)).await
    }
}
