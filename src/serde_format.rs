//! The HC-banner persisted-entry format (spec §6): a hand-rolled wire format
//! for backends that want to store a `CacheEntry` as opaque bytes rather
//! than lean on `serde`. Independent of `CacheEntry`'s own `Serialize`
//! derive, which remains available for backends that prefer
//! `postcard`/`bincode` (spec §9).
//!
//! Layout: a banner of `HC-`-prefixed pseudo-headers, a blank line, a
//! request-line and request headers, a blank line, a status-line and
//! response headers, a blank line, then the raw body bytes verbatim.

use crate::entry::{CacheEntry, StoredHeaders, VariantMap};
use crate::error::{CacheError, Result};
use crate::resource::Resource;
use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Encodes `entry` into the HC-banner format.
pub fn encode_entry(entry: &CacheEntry) -> Result<Bytes> {
    let body = match &entry.resource {
        Some(resource) => resource.get()?,
        None => Bytes::new(),
    };

    let mut out = BytesMut::new();
    write_line(&mut out, &format!("HC-Resource-Length: {}", body.len()));
    write_line(&mut out, &format!("HC-Request-Instant: {}", to_epoch_secs(entry.request_instant)));
    write_line(&mut out, &format!("HC-Response-Instant: {}", to_epoch_secs(entry.response_instant)));
    write_line(&mut out, &format!("HC-Variant: {}", encode_variants(&entry.variants)));
    write_line(&mut out, "");

    write_line(&mut out, &format!("{} {} HTTP/1.1", entry.method, entry.uri));
    for (name, value) in &entry.variant_selector_fields.0 {
        write_line(&mut out, &format!("{name}: {value}"));
    }
    write_line(&mut out, "");

    write_line(
        &mut out,
        &format!(
            "HTTP/1.1 {} {}",
            entry.status.as_u16(),
            entry.status.canonical_reason().unwrap_or("")
        ),
    );
    for (name, value) in &entry.headers.0 {
        write_line(&mut out, &format!("{name}: {value}"));
    }
    write_line(&mut out, "");

    out.extend_from_slice(&body);
    Ok(out.freeze())
}

/// Decodes an entry previously produced by [`encode_entry`].
pub fn decode_entry(bytes: &[u8]) -> Result<CacheEntry> {
    let mut cursor = 0usize;

    let (banner_lines, consumed) = read_block(bytes, cursor)?;
    cursor += consumed;
    let mut resource_length = 0u64;
    let mut request_instant = SystemTime::UNIX_EPOCH;
    let mut response_instant = SystemTime::UNIX_EPOCH;
    let mut variants: Option<VariantMap> = None;
    for line in &banner_lines {
        let (name, value) = split_header(line)?;
        match name.as_str() {
            "hc-resource-length" => {
                resource_length = value.parse().map_err(|_| CacheError::BadHeader)?;
            }
            "hc-request-instant" => {
                request_instant = from_epoch_secs(value.parse().map_err(|_| CacheError::BadHeader)?);
            }
            "hc-response-instant" => {
                response_instant = from_epoch_secs(value.parse().map_err(|_| CacheError::BadHeader)?);
            }
            "hc-variant" => {
                variants = decode_variants(value);
            }
            _ => {}
        }
    }

    let (request_lines, consumed) = read_block(bytes, cursor)?;
    cursor += consumed;
    let mut request_lines_iter = request_lines.into_iter();
    let request_line = request_lines_iter.next().ok_or(CacheError::BadHeader)?;
    let mut request_parts = request_line.splitn(3, ' ');
    let method = Method::from_bytes(request_parts.next().ok_or(CacheError::BadHeader)?.as_bytes())?;
    let uri = request_parts.next().ok_or(CacheError::BadHeader)?.to_string();
    let variant_selector_fields = StoredHeaders(
        request_lines_iter.map(|l| split_header(&l)).collect::<Result<Vec<_>>>()?,
    );

    let (response_lines, consumed) = read_block(bytes, cursor)?;
    cursor += consumed;
    let mut response_lines_iter = response_lines.into_iter();
    let status_line = response_lines_iter.next().ok_or(CacheError::BadHeader)?;
    let mut status_parts = status_line.splitn(3, ' ');
    let _ = status_parts.next();
    let code: u16 = status_parts
        .next()
        .ok_or(CacheError::BadHeader)?
        .parse()
        .map_err(|_| CacheError::BadHeader)?;
    let status = StatusCode::from_u16(code)?;
    let headers = StoredHeaders(
        response_lines_iter.map(|l| split_header(&l)).collect::<Result<Vec<_>>>()?,
    );

    let body = Bytes::copy_from_slice(&bytes[cursor..]);
    if body.len() as u64 != resource_length {
        return Err(CacheError::BadHeader);
    }
    let resource = if body.is_empty() && variants.is_some() {
        None
    } else {
        Some(Resource::InMemory(Arc::new(body)))
    };

    Ok(CacheEntry {
        method,
        uri,
        variant_selector_fields,
        status,
        headers,
        resource,
        request_instant,
        response_instant,
        variants,
    })
}

fn write_line(out: &mut BytesMut, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\n");
}

/// Reads lines starting at `start` until a blank line, returning the
/// non-blank lines and the number of bytes consumed (including the blank
/// line's own terminator).
fn read_block(bytes: &[u8], start: usize) -> Result<(Vec<String>, usize)> {
    let mut lines = Vec::new();
    let mut pos = start;
    loop {
        let Some(newline_offset) = bytes[pos..].iter().position(|&b| b == b'\n') else {
            return Err(CacheError::BadHeader);
        };
        let line_end = pos + newline_offset;
        let line_bytes = &bytes[pos..line_end];
        let line_bytes = line_bytes.strip_suffix(b"\r").unwrap_or(line_bytes);
        pos = line_end + 1;
        if line_bytes.is_empty() {
            break;
        }
        lines.push(String::from_utf8(line_bytes.to_vec()).map_err(|_| CacheError::BadHeader)?);
    }
    Ok((lines, pos - start))
}

fn split_header(line: &str) -> Result<(String, String)> {
    let (name, value) = line.split_once(':').ok_or(CacheError::BadHeader)?;
    Ok((name.trim().to_ascii_lowercase(), value.trim().to_string()))
}

fn to_epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

fn from_epoch_secs(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn encode_variants(variants: &Option<VariantMap>) -> String {
    match variants {
        None => String::new(),
        Some(map) => map
            .iter()
            .map(|(selector, key)| format!("{selector}\x1f{key}"))
            .collect::<Vec<_>>()
            .join("\x1e"),
    }
}

fn decode_variants(value: &str) -> Option<VariantMap> {
    if value.is_empty() {
        return None;
    }
    let mut map = VariantMap::new();
    for entry in value.split('\x1e') {
        if let Some((selector, key)) = entry.split_once('\x1f') {
            map.insert(selector.to_string(), key.to_string());
        }
    }
    Some(map)
}
