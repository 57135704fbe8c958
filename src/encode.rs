use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine as _;

/// Image format label used in the `data:image/<format>` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// Infer from the file extension alone. No content sniffing; anything
    /// unrecognised (or no extension at all) is labelled jpeg.
    pub fn from_path(path: &Path) -> Self {
        let name = path.to_string_lossy().to_lowercase();
        let extension = name.rsplit('.').next().unwrap_or("");
        match extension {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "bmp" => Self::Bmp,
            "tif" | "tiff" => Self::Tiff,
            _ => Self::Jpeg,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct EncodedImage {
    pub base64: String,
    pub format: ImageFormat,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], format: ImageFormat) -> Self {
        Self {
            base64: Base64.encode(bytes),
            format,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:image/{};base64,{}", self.format, self.base64)
    }
}

/// Read a staged file and encode it for embedding in a chat request.
pub async fn encode_file(path: &Path) -> std::io::Result<EncodedImage> {
    let bytes = tokio::fs::read(path).await?;
    let format = ImageFormat::from_path(path);
    tracing::debug!(
        size = bytes.len(),
        %format,
        "encoded {}",
        path.display()
    );
    Ok(EncodedImage::from_bytes(&bytes, format))
}
