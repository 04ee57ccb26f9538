use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("not found: {body}")]
    NotFound { body: String },
    #[error("permission denied: {body}")]
    Permission { body: String },
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("upload session response missing Location header")]
    MissingUploadLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn file_metadata(&self, file_id: &str) -> Result<FileMetadata, DriveError> {
        let mut url = self.endpoint(&format!("/drive/v3/files/{file_id}"))?;
        url.query_pairs_mut().append_pair("fields", "name,mimeType");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn file_details(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint(&format!("/drive/v3/files/{file_id}"))?;
        url.query_pairs_mut().append_pair(
            "fields",
            "id,name,mimeType,size,webViewLink,createdTime,modifiedTime",
        );
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn download_content(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        let mut url = self.endpoint(&format!("/drive/v3/files/{file_id}"))?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.bytes().await?.to_vec())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let url = self.endpoint("/drive/v3/files")?;
        let body = CreateFileRequest {
            name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: parent_id.map(|id| vec![id.to_string()]),
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Opens a resumable upload session and returns the session URI to PUT
    /// the content to.
    pub async fn begin_resumable_upload(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable");
        let body = CreateFileRequest {
            name,
            mime_type: None,
            parents: parent_id.map(|id| vec![id.to_string()]),
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let location = response
            .headers()
            .get("Location")
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingUploadLocation)?;
        Ok(Url::parse(location)?)
    }

    pub async fn upload_to_session(
        &self,
        session: Url,
        body: reqwest::Body,
        content_length: u64,
    ) -> Result<DriveFile, DriveError> {
        let response = self
            .http
            .put(session)
            .header("Authorization", self.auth_header_value())
            .header("Content-Length", content_length)
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_children_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("q", &format!("'{folder_id}' in parents and trashed = false"));
            query.append_pair("fields", "nextPageToken,files(id,name,mimeType,size)");
            query.append_pair("pageSize", "100");
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_children_page(folder_id, page_token.as_deref())
                .await?;
            entries.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(entries)
    }

    /// Snapshot of a remote folder with aggregated child counts and sizes.
    /// Composed from two calls, never cached.
    pub async fn folder_info(&self, folder_id: &str) -> Result<FolderInfo, DriveError> {
        let details = self.file_details(folder_id).await?;
        let children = self.list_children(folder_id).await?;

        let mut contents = FolderContents {
            total_items: children.len() as u64,
            file_count: 0,
            folder_count: 0,
            total_size: 0,
            files: Vec::new(),
            subfolders: Vec::new(),
        };
        for child in children {
            if child.mime_type.as_deref() == Some(FOLDER_MIME_TYPE) {
                contents.folder_count += 1;
                contents.subfolders.push(child);
            } else {
                contents.file_count += 1;
                contents.total_size += child.size.unwrap_or(0);
                contents.files.push(child);
            }
        }

        Ok(FolderInfo {
            id: details.id,
            name: details.name,
            url: details.web_view_link.unwrap_or_default(),
            created_time: details.created_time,
            modified_time: details.modified_time,
            contents,
        })
    }

    /// Profile of the signed-in account, from the userinfo endpoint the
    /// Drive scopes ride along with.
    pub async fn user_info(&self) -> Result<UserInfo, DriveError> {
        let url = self.endpoint("/oauth2/v2/userinfo")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn error_from(response: reqwest::Response) -> DriveError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => DriveError::NotFound { body },
            StatusCode::FORBIDDEN => DriveError::Permission { body },
            _ => DriveError::Api { status, body },
        }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::NotFound { .. } | DriveError::Permission { .. } => {
                Some(ApiErrorClass::Permanent)
            }
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if status == StatusCode::UNAUTHORIZED {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFileRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    // Drive serializes int64 fields as JSON strings.
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub contents: FolderContents,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderContents {
    pub total_items: u64,
    pub file_count: u64,
    pub folder_count: u64,
    pub total_size: u64,
    pub files: Vec<DriveFile>,
    pub subfolders: Vec<DriveFile>,
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeRepr {
        Number(u64),
        Text(String),
    }

    match Option::<SizeRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(SizeRepr::Number(value)) => Ok(Some(value)),
        Some(SizeRepr::Text(value)) => value
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
