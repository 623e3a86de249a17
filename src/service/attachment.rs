use crate::models::Attachment;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MIME_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to fetch attachment: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to fetch attachment: {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("malformed data url")]
    MalformedDataUrl,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// 下载后的附件内容
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// 按 URL 取回上传的附件: http(s) 走网络，data: URL 就地解码
#[derive(Debug, Clone)]
pub struct AttachmentFetcher {
    http: Client,
}

impl AttachmentFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AttachmentError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub async fn fetch(&self, attachment: &Attachment) -> Result<FetchedAttachment, AttachmentError> {
        let mime_type = attachment
            .content_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let bytes = match attachment.url.strip_prefix("data:") {
            Some(rest) => decode_data_url(rest)?,
            None => self.download(&attachment.url).await?,
        };

        debug!("附件已取回: {} 字节, 类型 {}", bytes.len(), mime_type);
        Ok(FetchedAttachment { bytes, mime_type })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, AttachmentError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttachmentError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// `<mime>;base64,<payload>` (前缀 `data:` 已去掉)
fn decode_data_url(rest: &str) -> Result<Vec<u8>, AttachmentError> {
    let (meta, payload) = rest.split_once(',').ok_or(AttachmentError::MalformedDataUrl)?;
    if !meta.ends_with(";base64") {
        return Err(AttachmentError::MalformedDataUrl);
    }
    Ok(STANDARD.decode(payload.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> AttachmentFetcher {
        AttachmentFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn data_url_is_decoded_and_mime_defaults_to_pdf() {
        let attachment = Attachment {
            url: format!("data:application/pdf;base64,{}", STANDARD.encode(b"%PDF-1.5")),
            name: Some("invoice.pdf".into()),
            content_type: None,
        };
        let fetched = fetcher().fetch(&attachment).await.unwrap();
        assert_eq!(fetched.bytes, b"%PDF-1.5");
        assert_eq!(fetched.mime_type, DEFAULT_MIME_TYPE);
    }

    #[tokio::test]
    async fn data_url_without_base64_marker_is_rejected() {
        let attachment = Attachment {
            url: "data:text/plain,hello".into(),
            name: None,
            content_type: Some("text/plain".into()),
        };
        assert!(matches!(
            fetcher().fetch(&attachment).await,
            Err(AttachmentError::MalformedDataUrl)
        ));
    }
}
