use anyhow::{anyhow, bail};
use sha2::{Digest, Sha256};

/// Program/notice images stay under 5 MB decoded.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
/// Transcript evidence files stay under 10 MB decoded.
pub const MAX_TRANSCRIPT_BYTES: usize = 10 * 1024 * 1024;

pub const ACCEPTED_TRANSCRIPT_MIME: [&str; 3] = ["application/pdf", "image/jpeg", "image/png"];
pub const ACCEPTED_IMAGE_MIME: [&str; 2] = ["image/jpeg", "image/png"];

/// A parsed `data:` URL. The payload is never decoded: the decoded size
/// follows arithmetically from the base64 length, and the fingerprint is
/// computed over the encoded payload, which identifies content just as well.
#[derive(Debug, Clone)]
pub struct DataUrl {
    pub mime: String,
    pub decoded_len: usize,
    pub checksum: String,
}

pub fn parse_data_url(url: &str) -> anyhow::Result<DataUrl> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URL has no payload"))?;
    let mime = match header.strip_suffix(";base64") {
        Some(m) => m,
        None => bail!("data URL payload must be base64-encoded"),
    };
    if mime.is_empty() {
        bail!("data URL has no media type");
    }
    if payload.is_empty() {
        bail!("data URL payload is empty");
    }
    if payload.len() % 4 != 0
        || !payload
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
    {
        bail!("data URL payload is not valid base64");
    }

    let padding = payload.bytes().rev().take_while(|&b| b == b'=').count();
    if padding > 2 {
        bail!("data URL payload is not valid base64");
    }
    let decoded_len = payload.len() / 4 * 3 - padding;

    let digest = Sha256::digest(payload.as_bytes());
    let checksum = digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    Ok(DataUrl {
        mime: mime.to_string(),
        decoded_len,
        checksum,
    })
}

pub fn validate_transcript(url: &str) -> anyhow::Result<DataUrl> {
    let parsed = parse_data_url(url)?;
    if !ACCEPTED_TRANSCRIPT_MIME.contains(&parsed.mime.as_str()) {
        bail!("PDF, JPG, PNG 파일만 업로드 가능합니다.");
    }
    if parsed.decoded_len > MAX_TRANSCRIPT_BYTES {
        bail!("파일 크기는 10MB 이하여야 합니다.");
    }
    Ok(parsed)
}

pub fn validate_image(url: &str) -> anyhow::Result<DataUrl> {
    let parsed = parse_data_url(url)?;
    if !ACCEPTED_IMAGE_MIME.contains(&parsed.mime.as_str()) {
        bail!("JPG, PNG 이미지만 업로드 가능합니다.");
    }
    if parsed.decoded_len > MAX_IMAGE_BYTES {
        bail!("이미지 크기는 5MB 이하여야 합니다.");
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mime_and_decoded_length() {
        // "hello" -> aGVsbG8= (5 bytes, one padding char)
        let parsed = parse_data_url("data:application/pdf;base64,aGVsbG8=").expect("parse");
        assert_eq!(parsed.mime, "application/pdf");
        assert_eq!(parsed.decoded_len, 5);
        assert_eq!(parsed.checksum.len(), 64);
    }

    #[test]
    fn rejects_non_base64_and_bad_mime() {
        assert!(parse_data_url("data:application/pdf,plain").is_err());
        assert!(parse_data_url("http://example.com/x.pdf").is_err());
        assert!(validate_transcript("data:application/zip;base64,aGVsbG8=").is_err());
        assert!(validate_image("data:application/pdf;base64,aGVsbG8=").is_err());
    }

    #[test]
    fn same_payload_same_checksum() {
        let a = parse_data_url("data:image/png;base64,aGVsbG8=").expect("parse a");
        let b = parse_data_url("data:image/png;base64,aGVsbG8=").expect("parse b");
        assert_eq!(a.checksum, b.checksum);
    }
}
