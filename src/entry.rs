//! The stored-entry data model (spec §3): `CacheEntry`, the variant map,
//! `CacheMatch`, and the pure hop-by-hop header filter used when an entry
//! is created.

use crate::resource::Resource;
use http::{HeaderMap, HeaderName, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Header fields that are per-hop, not part of the cached representation
/// (spec §3, §9). Extended at call sites by any tokens the `Connection`
/// header itself lists.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
    "proxy-authentication-info",
];

/// Status codes the engine understands and is willing to store (spec §3
/// invariant 3).
pub fn is_understood_status(status: StatusCode) -> bool {
    let code = status.as_u16();
    matches!(code, 100..=101 | 200..=206 | 300..=307 | 400..=417 | 421 | 500..=505)
}

/// Strips hop-by-hop headers from a header set: the fixed list plus any
/// token named in the `Connection` header (spec §3, §9). Pure function over
/// a header set, as the design notes require.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut extra_tokens: Vec<String> = Vec::new();
    for value in headers.get_all(http::header::CONNECTION) {
        if let Ok(s) = value.to_str() {
            extra_tokens.extend(s.split(',').map(|t| t.trim().to_ascii_lowercase()));
        }
    }
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if extra_tokens.iter().any(|t| t == &lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// A canonicalized snapshot of a `HeaderMap`, the shape actually persisted
/// on a `CacheEntry` (order-preserving multi-map keeps `serde` simple and
/// backend-agnostic, matching the teacher's `HttpHeaders` approach of
/// carrying headers as an owned, serializable collection rather than
/// borrowing `http::HeaderMap` directly, which isn't `Serialize`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredHeaders(pub Vec<(String, String)>);

impl From<&HeaderMap> for StoredHeaders {
    fn from(headers: &HeaderMap) -> Self {
        StoredHeaders(
            headers
                .iter()
                .filter_map(|(n, v)| {
                    v.to_str().ok().map(|v| (n.as_str().to_string(), v.to_string()))
                })
                .collect(),
        )
    }
}

impl StoredHeaders {
    pub fn to_header_map(&self) -> HeaderMap {
        let mut out = HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                http::HeaderValue::from_str(value),
            ) {
                out.append(name, value);
            }
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Mapping from variant selector to derived storage key, carried inside a
/// root entry (spec §3 "Variant map").
pub type VariantMap = BTreeMap<String, String>;

/// The unit stored by the backend (spec §3 `CacheEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(with = "method_serde")]
    pub method: Method,
    pub uri: String,
    /// Request header values for each field named in the response's
    /// `Vary`, keyed case-insensitively lowercase — the entry's own variant
    /// selector inputs, used to recompute `variant_selector` on demand.
    pub variant_selector_fields: StoredHeaders,
    #[serde(with = "status_serde")]
    pub status: StatusCode,
    pub headers: StoredHeaders,
    /// Absent for 204/304 responses and for HEAD requests, and for any root
    /// entry that carries a non-empty `variants` map (invariant 2).
    #[serde(skip)]
    pub resource: Option<Resource>,
    pub request_instant: SystemTime,
    pub response_instant: SystemTime,
    /// Present only on a root entry for a `Vary`-advertising resource.
    pub variants: Option<VariantMap>,
}

mod method_serde {
    use http::Method;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(m: &Method, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(m.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Method, D::Error> {
        let s = String::deserialize(d)?;
        Method::from_bytes(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

mod status_serde {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(s: &StatusCode, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u16(s.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(d)?;
        StatusCode::from_u16(code).map_err(serde::de::Error::custom)
    }
}

impl CacheEntry {
    /// True when this entry is a root with a non-empty variant map — per
    /// invariant 2, such an entry must never carry a body.
    pub fn is_variant_root(&self) -> bool {
        self.variants.as_ref().is_some_and(|v| !v.is_empty())
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.headers.get("last-modified")
    }

    pub fn date(&self) -> Option<SystemTime> {
        self.headers
            .get("date")
            .and_then(|d| httpdate::parse_http_date(d).ok())
    }

    /// Builds the entry that results from storing a fresh exchange (spec
    /// §4.9 `store`): hop-by-hop headers and `Transfer-Encoding` are never
    /// persisted, and `variants` starts empty — the caller fills it in only
    /// when turning this into (or merging it with) a variant root.
    #[allow(clippy::too_many_arguments)]
    pub fn from_response(
        method: Method,
        uri: String,
        variant_selector_fields: StoredHeaders,
        status: StatusCode,
        response_headers: &HeaderMap,
        resource: Option<Resource>,
        request_instant: SystemTime,
        response_instant: SystemTime,
    ) -> CacheEntry {
        let mut headers = strip_hop_by_hop(response_headers);
        headers.remove(http::header::TRANSFER_ENCODING);
        CacheEntry {
            method,
            uri,
            variant_selector_fields,
            status,
            headers: (&headers).into(),
            resource,
            request_instant,
            response_instant,
            variants: None,
        }
    }
}

/// A pair `(hit, root)` produced by a store lookup (spec §3 `CacheMatch`).
#[derive(Debug, Clone, Default)]
pub struct CacheMatch {
    /// The specific variant entry that matches the live request, if any.
    pub hit: Option<CacheEntry>,
    /// The root entry for the resource, if any (may equal `hit` when the
    /// resource has no variants).
    pub root: Option<CacheEntry>,
}

impl CacheMatch {
    pub fn none() -> Self {
        CacheMatch::default()
    }
}
