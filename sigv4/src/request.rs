use crate::{SigError, GET_IDENTITY_BODY};

const MAX_HEADERS: usize = 32;

/// A signed identity request in transit: parsed from the opaque blob on the
/// server, serialized to the blob on the client. Serialization is
/// deterministic — request line, `Host`, then the remaining headers sorted
/// by name with the computed `Content-Length` slotted in.
#[derive(Debug, Clone)]
pub struct IdentityRequest {
    pub method: String,
    pub path: String,
    pub host: String,
    /// All headers except `Host` and `Content-Length`.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl IdentityRequest {
    pub fn parse(blob: &[u8]) -> Result<Self, SigError> {
        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut header_storage);

        let body_offset = match parsed.parse(blob) {
            Ok(httparse::Status::Complete(offset)) => offset,
            Ok(httparse::Status::Partial) | Err(_) => {
                return Err(SigError::MalformedRequest(
                    String::from_utf8_lossy(blob).chars().take(64).collect(),
                ))
            }
        };

        let method = parsed
            .method
            .ok_or_else(|| SigError::MalformedRequest("missing method".into()))?
            .to_string();
        let path = parsed
            .path
            .ok_or_else(|| SigError::MalformedRequest("missing path".into()))?
            .to_string();

        let mut host = String::new();
        let mut headers = Vec::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| SigError::MalformedRequest("non-utf8 header value".into()))?
                .to_string();
            if header.name.eq_ignore_ascii_case("host") {
                host = value;
            } else if !header.name.eq_ignore_ascii_case("content-length") {
                headers.push((header.name.to_string(), value));
            }
        }
        if host.is_empty() {
            return Err(SigError::MalformedRequest("missing Host header".into()));
        }

        let body = std::str::from_utf8(&blob[body_offset..])
            .map_err(|_| SigError::MalformedRequest("non-utf8 body".into()))?
            .to_string();

        Ok(Self {
            method,
            path,
            host,
            headers,
            body,
        })
    }

    /// Serialize back to the wire form. `parse` followed by `write` is
    /// byte-identical for requests produced by
    /// [`create_signed_request`](crate::create_signed_request).
    pub fn write(&self) -> Vec<u8> {
        let mut headers = self.headers.clone();
        headers.push(("Content-Length".to_string(), self.body.len().to_string()));
        headers.sort_by(|(a, _), (b, _)| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));

        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, self.path);
        out.push_str(&format!("Host: {}\r\n", self.host));
        for (name, value) in &headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }

    /// Case-insensitive single-header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Parse a submitted blob and overwrite the request target and body with
/// known-good values, so the server cannot be used as a signed-request
/// proxy for any other action.
pub fn parse_and_validate(blob: &[u8]) -> Result<IdentityRequest, SigError> {
    let mut request = IdentityRequest::parse(blob)?;
    request.path = "/".to_string();
    request.body = GET_IDENTITY_BODY.to_string();
    Ok(request)
}
