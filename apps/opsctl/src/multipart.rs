//! Streamed `multipart/form-data` upload bodies.
//!
//! Product and installation uploads are one file part followed by a few text
//! fields. The file is never held in memory: the encoded body is the part
//! header, the file stream and the trailing fields, and it is reopened from
//! disk when the transport retries.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use opskit_http::{FileSource, RequestBody, UploadSource};
use rand::Rng;

/// A file plus text fields, encoded as `multipart/form-data`.
pub struct MultipartForm {
    boundary: String,
    file_key: String,
    file_name: String,
    file: FileSource,
    fields: Vec<(String, String)>,
}

impl fmt::Debug for MultipartForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field_names: Vec<&str> = self.fields.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("MultipartForm")
            .field("boundary", &self.boundary)
            .field("file_key", &self.file_key)
            .field("file", &self.file.path())
            .field("fields", &field_names)
            .finish_non_exhaustive()
    }
}

impl MultipartForm {
    /// Starts a form whose first part is the file at `path`.
    ///
    /// # Errors
    /// When the file cannot be read or is empty.
    pub async fn with_file(key: &str, path: &Path) -> Result<Self> {
        let file = FileSource::new(path)
            .await
            .with_context(|| format!("could not open {}", path.display()))?;
        if file.content_length() == 0 {
            bail!("file provided has no content: {}", path.display());
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            boundary: format!("{:032x}", rand::rng().random::<u128>()),
            file_key: key.to_owned(),
            file_name,
            file,
            fields: Vec::new(),
        })
    }

    #[must_use]
    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((key.to_owned(), value.to_owned()));
        self
    }

    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encodes the form into a replayable body.
    ///
    /// # Errors
    /// When the file cannot be opened.
    pub async fn into_body(self) -> Result<RequestBody> {
        let (head, tail) = self.envelope();
        let encoded = EncodedForm {
            head,
            file: self.file,
            tail,
        };
        Ok(RequestBody::from_source(Arc::new(encoded)).await?)
    }

    fn envelope(&self) -> (Bytes, Bytes) {
        let boundary = &self.boundary;
        let head = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            escape_quotes(&self.file_key),
            escape_quotes(&self.file_name),
        );
        let mut tail = String::from("\r\n");
        for (key, value) in &self.fields {
            tail.push_str("--");
            tail.push_str(boundary);
            tail.push_str("\r\nContent-Disposition: form-data; name=\"");
            tail.push_str(&escape_quotes(key));
            tail.push_str("\"\r\n\r\n");
            tail.push_str(value);
            tail.push_str("\r\n");
        }
        tail.push_str("--");
        tail.push_str(boundary);
        tail.push_str("--\r\n");
        (Bytes::from(head), Bytes::from(tail))
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

struct EncodedForm {
    head: Bytes,
    file: FileSource,
    tail: Bytes,
}

#[async_trait]
impl UploadSource for EncodedForm {
    fn content_length(&self) -> u64 {
        self.head.len() as u64 + self.file.content_length() + self.tail.len() as u64
    }

    async fn open(&self) -> std::io::Result<BoxStream<'static, std::io::Result<Bytes>>> {
        let file = self.file.open().await?;
        let head = stream::once(std::future::ready(Ok(self.head.clone())));
        let tail = stream::once(std::future::ready(Ok(self.tail.clone())));
        Ok(head.chain(file).chain(tail).boxed())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io::Write;

    #[tokio::test]
    async fn encodes_file_then_fields() {
        let mut file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        file.write_all(b"PK-contents").unwrap();

        let form = MultipartForm::with_file("installation[file]", file.path())
            .await
            .unwrap()
            .field("passphrase", "s3cret");
        let boundary = form.boundary.clone();
        let body = form.into_body().await.unwrap();
        let declared = body.content_length().unwrap();
        assert!(body.is_rewindable());

        let bytes = body.collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.len() as u64, declared);
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.contains("name=\"installation[file]\"; filename=\""));
        assert!(text.contains("\r\n\r\nPK-contents\r\n"));
        assert!(text.contains("name=\"passphrase\"\r\n\r\ns3cret\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[tokio::test]
    async fn empty_and_missing_files_are_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = MultipartForm::with_file("product[file]", file.path())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("file provided has no content"), "{err}");

        let err = MultipartForm::with_file("product[file]", Path::new("/does/not/exist.pivotal"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "could not open /does/not/exist.pivotal");
    }

    #[tokio::test]
    async fn debug_hides_field_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();
        let form = MultipartForm::with_file("k", file.path())
            .await
            .unwrap()
            .field("passphrase", "s3cret");
        let rendered = format!("{form:?}");
        assert!(rendered.contains("passphrase"));
        assert!(!rendered.contains("s3cret"));
    }
}
