//! Image acquisition.
//!
//! Resolves the form input into image bytes, either from a local file or an
//! http(s) URL, and decodes them. Validation happens before any network call.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use reqwest::Url;

use crate::error::{DecodeError, ImageLoadError};

const USER_AGENT: &str = "captcha-digits";

/// Extensions that declare a non-image type. Anything unlisted and not a
/// known image format is treated as untyped.
const NON_IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("js", "text/javascript"),
    ("mp4", "video/mp4"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
];

/// What the user selected in the form.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageInput {
    File(PathBuf),
    Url(String),
}

impl ImageInput {
    /// Picks the input the way the form does: a selected file wins,
    /// otherwise a non-empty trimmed URL.
    pub fn from_form(file: Option<&Path>, url: &str) -> Result<Self, DecodeError> {
        if let Some(path) = file {
            return Ok(Self::File(path.to_path_buf()));
        }
        let url = url.trim();
        if !url.is_empty() {
            return Ok(Self::Url(url.to_string()));
        }
        Err(DecodeError::NoInputSelected)
    }

    /// Parses a command-line argument: http(s)-looking values are URLs.
    pub fn from_arg(arg: &str) -> Self {
        if arg.contains("://") {
            Self::Url(arg.trim().to_string())
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

/// Raw image bytes with the MIME type that came with them, if any.
#[derive(Clone, Debug)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

/// Fetches image bytes from a validated URL.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> Result<ImageBlob, ImageLoadError>;
}

/// Blocking HTTP fetcher.
///
/// No cookie store is configured, so requests never carry credentials.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// `timeout` of `None` waits for the server indefinitely.
    pub fn new(timeout: Option<Duration>) -> Result<Self, ImageLoadError> {
        Self::from_builder(reqwest::blocking::Client::builder().timeout(timeout))
    }

    fn from_builder(builder: reqwest::blocking::ClientBuilder) -> Result<Self, ImageLoadError> {
        let client = builder
            .build()
            .map_err(|e| ImageLoadError::Fetch(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<ImageBlob, ImageLoadError> {
        let response = self
            .client
            .get(url.clone())
            .header("User-Agent", USER_AGENT)
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .send()
            .map_err(|e| ImageLoadError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ImageLoadError::HttpStatus(response.status().as_u16()));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_ascii_lowercase());

        match mime.as_deref() {
            Some(m) if m.starts_with("image/") => {}
            other => {
                return Err(ImageLoadError::NotAnImage(
                    other.unwrap_or("missing content type").to_string(),
                ));
            }
        }

        let bytes = response
            .bytes()
            .map_err(|e| ImageLoadError::Fetch(e.to_string()))?;

        Ok(ImageBlob {
            bytes: bytes.to_vec(),
            mime,
        })
    }
}

/// Parses the URL text and restricts it to http/https.
pub fn parse_image_url(raw: &str) -> Result<Url, ImageLoadError> {
    let url = Url::parse(raw.trim()).map_err(|e| ImageLoadError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ImageLoadError::UnsupportedScheme(other.to_string())),
    }
}

/// MIME type a file declares through its extension, if recognizable.
pub fn declared_mime(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if let Some(format) = ImageFormat::from_extension(&ext) {
        return Some(format.to_mime_type().to_string());
    }
    NON_IMAGE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| mime.to_string())
}

/// Rejects files that declare a non-image type. Untyped files pass.
pub fn validate_file(path: &Path) -> Result<Option<String>, ImageLoadError> {
    match declared_mime(path) {
        Some(mime) if !mime.starts_with("image/") => Err(ImageLoadError::NotAnImage(mime)),
        mime => Ok(mime),
    }
}

/// Reads and validates a local image file.
pub fn load_file(path: &Path) -> Result<ImageBlob, ImageLoadError> {
    let mime = validate_file(path)?;
    let bytes = std::fs::read(path).map_err(|e| ImageLoadError::Io(e.to_string()))?;
    Ok(ImageBlob { bytes, mime })
}

/// Resolves the selected input into image bytes.
pub fn acquire(input: &ImageInput, fetcher: &dyn ImageFetcher) -> Result<ImageBlob, ImageLoadError> {
    match input {
        ImageInput::File(path) => load_file(path),
        ImageInput::Url(raw) => {
            let url = parse_image_url(raw)?;
            crate::log(&format!("Fetching image: {}", url));
            fetcher.fetch(&url)
        }
    }
}

/// Decodes the bytes, guessing the format from content.
pub fn decode_blob(blob: &ImageBlob) -> Result<DynamicImage, ImageLoadError> {
    image::load_from_memory(&blob.bytes).map_err(|e| ImageLoadError::Decode(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves a fixed blob and counts calls.
    pub struct StubFetcher {
        pub blob: ImageBlob,
        pub calls: Arc<AtomicUsize>,
    }

    impl ImageFetcher for StubFetcher {
        fn fetch(&self, _url: &Url) -> Result<ImageBlob, ImageLoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.blob.clone())
        }
    }

    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::GrayImage::from_pixel(width, height, image::Luma([200u8]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn stub() -> StubFetcher {
        StubFetcher {
            blob: ImageBlob {
                bytes: png_bytes(4, 4),
                mime: Some("image/png".to_string()),
            },
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[test]
    fn test_form_prefers_file() {
        let input = ImageInput::from_form(Some(Path::new("a.png")), "https://x/y.png").unwrap();
        assert_eq!(input, ImageInput::File(PathBuf::from("a.png")));
    }

    #[test]
    fn test_form_trims_url() {
        let input = ImageInput::from_form(None, "  https://x/y.png \n").unwrap();
        assert_eq!(input, ImageInput::Url("https://x/y.png".to_string()));
    }

    #[test]
    fn test_form_without_input() {
        assert_eq!(
            ImageInput::from_form(None, "   "),
            Err(DecodeError::NoInputSelected)
        );
    }

    #[test]
    fn test_from_arg() {
        assert!(matches!(ImageInput::from_arg("http://a/b.png"), ImageInput::Url(_)));
        assert!(matches!(ImageInput::from_arg("captcha.png"), ImageInput::File(_)));
    }

    #[test]
    fn test_rejects_non_http_scheme_without_fetching() {
        let fetcher = stub();
        let err = acquire(&ImageInput::Url("ftp://host/a.png".into()), &fetcher).unwrap_err();
        assert_eq!(err, ImageLoadError::UnsupportedScheme("ftp".into()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejects_relative_url_without_fetching() {
        let fetcher = stub();
        let err = acquire(&ImageInput::Url("images/a.png".into()), &fetcher).unwrap_err();
        assert!(matches!(err, ImageLoadError::InvalidUrl(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_valid_url_is_fetched() {
        let fetcher = stub();
        let blob = acquire(&ImageInput::Url("https://host/a.png".into()), &fetcher).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(decode_blob(&blob).is_ok());
    }

    #[test]
    fn test_declared_mime() {
        assert_eq!(declared_mime(Path::new("a.PNG")).as_deref(), Some("image/png"));
        assert_eq!(declared_mime(Path::new("a.jpeg")).as_deref(), Some("image/jpeg"));
        assert_eq!(declared_mime(Path::new("notes.txt")).as_deref(), Some("text/plain"));
        assert_eq!(declared_mime(Path::new("captcha")), None);
        assert_eq!(declared_mime(Path::new("blob.bin")), None);
    }

    #[test]
    fn test_file_with_non_image_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"1234").unwrap();
        assert_eq!(
            load_file(&path).unwrap_err(),
            ImageLoadError::NotAnImage("text/plain".into())
        );
    }

    #[test]
    fn test_untyped_file_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captcha");
        std::fs::write(&path, png_bytes(8, 2)).unwrap();
        let blob = load_file(&path).unwrap();
        assert!(blob.mime.is_none());
        let img = decode_blob(&blob).unwrap();
        assert_eq!((img.width(), img.height()), (8, 2));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file(&dir.path().join("gone.png")).unwrap_err();
        assert!(matches!(err, ImageLoadError::Io(_)));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let blob = ImageBlob {
            bytes: b"not an image".to_vec(),
            mime: None,
        };
        assert!(matches!(decode_blob(&blob), Err(ImageLoadError::Decode(_))));
    }

    /// Serves one canned HTTP response on 127.0.0.1 and hands back the raw request.
    fn serve_once(response: Vec<u8>) -> (Url, std::thread::JoinHandle<String>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(&response).unwrap();
            stream.flush().unwrap();
            String::from_utf8_lossy(&request).to_ascii_lowercase()
        });
        let url = Url::parse(&format!("http://127.0.0.1:{}/captcha.png", port)).unwrap();
        (url, handle)
    }

    fn http_response(status: &str, content_type: Option<&str>, body: &[u8]) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            status,
            body.len()
        );
        if let Some(ct) = content_type {
            head.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn local_fetcher() -> HttpFetcher {
        HttpFetcher::from_builder(
            reqwest::blocking::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(10)),
        )
        .unwrap()
    }

    #[test]
    fn test_http_error_status() {
        let (url, server) = serve_once(http_response("404 Not Found", Some("text/html"), b"gone"));
        let err = local_fetcher().fetch(&url).unwrap_err();
        assert_eq!(err, ImageLoadError::HttpStatus(404));
        server.join().unwrap();
    }

    #[test]
    fn test_http_non_image_content_type() {
        let (url, server) =
            serve_once(http_response("200 OK", Some("text/html; charset=utf-8"), b"<html>"));
        let err = local_fetcher().fetch(&url).unwrap_err();
        assert_eq!(err, ImageLoadError::NotAnImage("text/html; charset=utf-8".into()));
        server.join().unwrap();
    }

    #[test]
    fn test_http_missing_content_type() {
        let (url, server) = serve_once(http_response("200 OK", None, &png_bytes(2, 2)));
        let err = local_fetcher().fetch(&url).unwrap_err();
        assert_eq!(err, ImageLoadError::NotAnImage("missing content type".into()));
        server.join().unwrap();
    }

    #[test]
    fn test_http_image_fetched_without_cache_or_credentials() {
        let png = png_bytes(6, 3);
        let (url, server) = serve_once(http_response("200 OK", Some("image/png"), &png));
        let blob = local_fetcher().fetch(&url).unwrap();
        assert_eq!(blob.mime.as_deref(), Some("image/png"));
        assert_eq!(blob.bytes, png);

        let request = server.join().unwrap();
        assert!(request.starts_with("get /captcha.png"));
        assert!(request.contains("cache-control: no-cache"));
        assert!(!request.contains("cookie:"));
        assert!(!request.contains("authorization:"));
    }
}
