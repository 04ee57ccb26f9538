mod client;
mod file_type;
mod oauth;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, DriveFile, FileList, FileMetadata, FolderContents,
    FolderInfo, UserInfo, FOLDER_MIME_TYPE,
};
pub use file_type::extension_for;
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
