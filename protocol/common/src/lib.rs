//! Shared message carriers for the wire protocols.
//!
//! Both protocol flavors (memcached ASCII and RESP) parse into the same
//! [`Request`] shape and compose from the same [`Response`] shape; only the
//! framing differs. Carriers are pooled and reset between messages so a
//! connection never allocates on the steady-state path beyond what its
//! largest request needed.
//!
//! Parsers are incremental: on short input they return [`ParseError::Unfin`]
//! without consuming, and the caller retries with the same carrier once more
//! bytes arrive. The carrier records where parsing left off in
//! [`Request::pstate`].

use std::fmt;

use buffer::BufFull;

mod pool;

pub use pool::Pool;

/// Upper bound on keys in one batched retrieval.
pub const MAX_BATCH_SIZE: usize = 50;

/// Upper bound on key length on the wire.
pub const MAX_KEY_LEN: usize = 250;

/// Upper bound on any single ASCII token.
pub const MAX_TOKEN_LEN: usize = 256;

/// Parse outcome for an incremental parser.
pub type ParseResult<T> = Result<T, ParseError>;

/// Non-OK parser statuses.
///
/// `Unfin` is the resumable case; everything else terminates the request.
/// `Empty` never escapes a parser's public entry point: it marks an absent
/// token at a permitted boundary (end of a variadic key list, an omitted
/// `noreply`) and is converted to `Ok` or a hard error internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Need more bytes; call again with the same carrier and buffer.
    Unfin,
    /// Expected token absent at a permitted boundary.
    Empty,
    /// Malformed framing; the connection should be dropped or the client
    /// told `CLIENT_ERROR`.
    Invalid(&'static str),
    /// Well-framed but semantically unacceptable (too many keys, oversized
    /// token).
    Other(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unfin => write!(f, "incomplete request"),
            Self::Empty => write!(f, "empty token"),
            Self::Invalid(msg) => write!(f, "bad command line format: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Composer failure: the response did not fit under the buffer's growth cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeError {
    /// The buffer cap that was hit.
    pub max_size: usize,
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out of buffer space (cap {} bytes)", self.max_size)
    }
}

impl std::error::Error for ComposeError {}

impl From<BufFull> for ComposeError {
    fn from(e: BufFull) -> Self {
        Self {
            max_size: e.max_size,
        }
    }
}

/// Request verbs understood by either protocol flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    #[default]
    Unknown,
    Get,
    Gets,
    Mget,
    Set,
    Add,
    Replace,
    Cas,
    Append,
    Prepend,
    Incr,
    Decr,
    Delete,
    Flush,
    Quit,
}

impl RequestType {
    /// Whether this verb carries a value body.
    #[inline]
    pub fn has_val(self) -> bool {
        matches!(
            self,
            Self::Set | Self::Add | Self::Replace | Self::Cas | Self::Append | Self::Prepend
        )
    }
}

/// Coarse request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReqState {
    #[default]
    Created,
    Parsing,
    Parsed,
}

/// Where an in-flight parse will resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    #[default]
    Hdr,
    Val,
}

/// A parsed (or parsing) request.
///
/// Key and value bytes are owned so the carrier stays valid while the read
/// buffer compacts or grows underneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub rtype: RequestType,
    pub rstate: ReqState,
    pub pstate: ParseState,
    pub keys: Vec<Vec<u8>>,
    pub flag: u32,
    pub expiry: u32,
    pub vlen: u32,
    pub vcas: u64,
    pub delta: u64,
    pub vstr: Vec<u8>,
    pub noreply: bool,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the carrier to its `Created` state, keeping allocations.
    pub fn reset(&mut self) {
        self.rtype = RequestType::Unknown;
        self.rstate = ReqState::Created;
        self.pstate = ParseState::Hdr;
        self.keys.clear();
        self.flag = 0;
        self.expiry = 0;
        self.vlen = 0;
        self.vcas = 0;
        self.delta = 0;
        self.vstr.clear();
        self.noreply = false;
    }

    /// First key, for single-key verbs.
    #[inline]
    pub fn key(&self) -> &[u8] {
        self.keys.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Response kinds across both protocol flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Unknown,
    Ok,
    End,
    Stored,
    NotStored,
    Exists,
    Deleted,
    NotFound,
    Value,
    Numeric,
    ClientError,
    ServerError,
}

/// A response being composed (or, for the memcached flavor, parsed on the
/// client side).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub rtype: ResponseType,
    pub rstate: ReqState,
    pub pstate: ParseState,
    pub key: Vec<u8>,
    pub flag: u32,
    pub vlen: u32,
    pub vcas: u64,
    /// Include the CAS token when composing a `VALUE` line.
    pub cas: bool,
    /// The response carries a numeric payload in `vint`.
    pub num: bool,
    pub vint: u64,
    pub vstr: Vec<u8>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.rtype = ResponseType::Unknown;
        self.rstate = ReqState::Created;
        self.pstate = ParseState::Hdr;
        self.key.clear();
        self.flag = 0;
        self.vlen = 0;
        self.vcas = 0;
        self.cas = false;
        self.num = false;
        self.vint = 0;
        self.vstr.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_reset_keeps_nothing_visible() {
        let mut req = Request::new();
        req.rtype = RequestType::Set;
        req.rstate = ReqState::Parsed;
        req.keys.push(b"foo".to_vec());
        req.vstr.extend_from_slice(b"bar");
        req.flag = 7;
        req.noreply = true;

        req.reset();
        assert_eq!(req, Request::new());
    }

    #[test]
    fn test_has_val() {
        assert!(RequestType::Set.has_val());
        assert!(RequestType::Cas.has_val());
        assert!(RequestType::Prepend.has_val());
        assert!(!RequestType::Get.has_val());
        assert!(!RequestType::Incr.has_val());
        assert!(!RequestType::Quit.has_val());
    }

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ParseError::Invalid("non-digit in integer field").to_string(),
            "bad command line format: non-digit in integer field"
        );
        assert_eq!(
            ParseError::Other("too many keys in a batch").to_string(),
            "too many keys in a batch"
        );
    }
}
