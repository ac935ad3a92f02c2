//! Input resolution: normalise a user-supplied path or URL to image bytes.
//!
//! The orchestration core consumes bytes; this module is the convenience
//! shim the CLI (and library callers holding a path) use to obtain them.
//! Magic-byte sniffing happens here so callers get a meaningful error
//! before any network or model cost is incurred.

use crate::error::RxplainError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to raw image bytes.
///
/// If the input is a URL, download it with the given timeout. If it is a
/// local file, validate it exists and is readable. Either way the bytes
/// must sniff as a known image format.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Vec<u8>, RxplainError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input)?
    };

    image::guess_format(&bytes).map_err(|e| RxplainError::UnreadableImage {
        detail: format!("{input}: {e}"),
    })?;

    Ok(bytes)
}

/// Read a local file, mapping I/O errors to the input taxonomy.
fn read_local(path_str: &str) -> Result<Vec<u8>, RxplainError> {
    let path = PathBuf::from(path_str);

    match std::fs::read(&path) {
        Ok(bytes) => {
            debug!("Resolved local image: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(RxplainError::PermissionDenied { path })
        }
        Err(_) => Err(RxplainError::FileNotFound { path }),
    }
}

/// Download a URL and return the body bytes.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, RxplainError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RxplainError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| RxplainError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(RxplainError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| RxplainError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.org/rx.jpg"));
        assert!(is_url("http://example.org/rx.jpg"));
        assert!(!is_url("prescription.jpg"));
        assert!(!is_url("/tmp/rx.png"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/nonexistent/rx.jpg", 5).await.unwrap_err();
        assert!(matches!(err, RxplainError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_image_file_is_unreadable() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"just some text, no pixels here").unwrap();
        let err = resolve_input(f.path().to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, RxplainError::UnreadableImage { .. }));
    }

    #[tokio::test]
    async fn valid_png_resolves() {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            8,
            8,
            image::Rgb([0, 0, 0]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&buf).unwrap();

        let bytes = resolve_input(f.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(bytes, buf);
    }
}
