use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::Serialize;
use std::io::Write;
use thiserror::Error;
use tracing::{debug, warn};

use crate::markers::Markers;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decompression failed: {0}")]
    Inflate(String),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid JSON data: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoding failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("compression failed: {0}")]
    Deflate(std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Framing {
    #[default]
    Standard,
    UrlSafe,
}

/// Class/date lines that precede the encoded body in clipboard exports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadHeader {
    pub class_name: Option<String>,
    pub date: Option<String>,
}

impl PayloadHeader {
    pub fn is_empty(&self) -> bool {
        self.class_name.is_none() && self.date.is_none()
    }
}

/// Result of the permissive link decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkPayload {
    Json(serde_json::Value),
    Text(String),
}

pub fn encode<T: Serialize + ?Sized>(value: &T, framing: Framing) -> Result<String, EncodeError> {
    let json = serde_json::to_string(value)?;
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
    enc.write_all(json.as_bytes()).map_err(EncodeError::Deflate)?;
    let compressed = enc.finish().map_err(EncodeError::Deflate)?;
    debug!(json_len = json.len(), compressed_len = compressed.len(), "payload encoded");
    Ok(match framing {
        Framing::Standard => STANDARD.encode(compressed),
        Framing::UrlSafe => URL_SAFE_NO_PAD.encode(compressed),
    })
}

pub fn encode_with_header<T: Serialize + ?Sized>(
    value: &T,
    header: &PayloadHeader,
    markers: &Markers,
) -> Result<String, EncodeError> {
    let body = encode(value, Framing::Standard)?;
    let mut out = String::new();
    if let Some(c) = &header.class_name {
        out.push_str(&format!("{}: {}\n", markers.header_keys.class_name, c));
    }
    if let Some(d) = &header.date {
        out.push_str(&format!("{}: {}\n", markers.header_keys.date, d));
    }
    out.push_str(&markers.header_delimiter);
    out.push('\n');
    out.push_str(&body);
    Ok(out)
}

/// Splits the optional header block from the body.
pub fn split_header<'a>(payload: &'a str, markers: &Markers) -> (PayloadHeader, &'a str) {
    let mut header = PayloadHeader::default();
    let delim = markers.header_delimiter.as_str();

    let mut offset = 0;
    let mut found: Option<(usize, usize)> = None;
    for line in payload.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == delim && line.ends_with('\n') {
            found = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let Some((head_end, body_start)) = found else {
        return (header, payload.trim());
    };

    for line in payload[..head_end].lines() {
        let Some((key, value)) = line.trim_end_matches('\r').split_once(": ") else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if value.is_empty() {
            continue;
        }
        if key == markers.header_keys.class_name {
            header.class_name = Some(value.to_string());
        } else if key == markers.header_keys.date {
            header.date = Some(value.to_string());
        }
    }
    (header, payload[body_start..].trim())
}

/// Strict decoder for clipboard exports: header block allowed, standard
/// base64 body, JSON required.
pub fn decode(payload: &str, markers: &Markers) -> Result<serde_json::Value, DecodeError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    let (header, body) = split_header(payload, markers);
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = STANDARD.decode(compact.as_bytes())?;
    let text = String::from_utf8(inflate(&bytes)?)?;
    let mut value: serde_json::Value = serde_json::from_str(&text)?;

    if !header.is_empty() {
        if let Some(obj) = value.as_object_mut() {
            let meta = obj
                .entry("metadata")
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let Some(meta) = meta.as_object_mut() {
                meta.insert("header_class_name".to_string(), header.class_name.into());
                meta.insert("header_date".to_string(), header.date.into());
            }
        }
    }
    Ok(value)
}

/// Permissive decoder for share links: URL-safe unpadded base64, returns the
/// raw text when it is not JSON and `None` on any other failure.
pub fn decode_link(payload: &str) -> Option<LinkPayload> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    match decode_link_inner(payload) {
        Ok(text) => Some(match serde_json::from_str(&text) {
            Ok(v) => LinkPayload::Json(v),
            Err(_) => LinkPayload::Text(text),
        }),
        Err(e) => {
            warn!("link payload could not be decoded: {e}");
            None
        }
    }
}

fn decode_link_inner(payload: &str) -> Result<String, DecodeError> {
    let url_decoded = urlencoding::decode(payload)?;
    let mut b64: String = url_decoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while b64.len() % 4 != 0 {
        b64.push('=');
    }
    let bytes = STANDARD.decode(b64.as_bytes())?;
    Ok(String::from_utf8(inflate(&bytes)?)?)
}

/// Zlib-wrapped (pako default) or raw deflate, told apart by the zlib header.
/// A stream that ends before its final block is an error, not a short read.
fn inflate(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut d = Decompress::new(has_zlib_header(bytes));
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len() * 4 + 64);
    loop {
        if out.capacity() - out.len() < 1024 {
            out.reserve(out.capacity().max(1024));
        }
        let consumed = d.total_in() as usize;
        let produced = d.total_out();
        let status = d
            .decompress_vec(&bytes[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| DecodeError::Inflate(e.to_string()))?;
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                if d.total_in() as usize == consumed && d.total_out() == produced {
                    return Err(DecodeError::Inflate(
                        "compressed stream ended unexpectedly".to_string(),
                    ));
                }
            }
        }
    }
}

fn has_zlib_header(bytes: &[u8]) -> bool {
    if bytes.len() < 2 {
        return false;
    }
    let cmf = bytes[0];
    let flg = bytes[1];
    cmf & 0x0F == 8 && cmf >> 4 <= 7 && ((cmf as u16) << 8 | flg as u16) % 31 == 0
}
