//! Incremental request and response parsing.

use buffer::Buffer;
use protocol_common::{
    MAX_BATCH_SIZE, MAX_KEY_LEN, MAX_TOKEN_LEN, ParseError, ParseResult, ParseState, ReqState,
    Request, RequestType, Response, ResponseType,
};

/// Parse one request out of `buf` into `req`.
///
/// The header line is handled as a unit: [`ParseError::Unfin`] consumes
/// nothing and the line is re-read on the next call. Once a storage header
/// completes, its bytes are consumed and `req.pstate` moves to `Val`; the
/// value pass then waits for exactly `vlen` octets plus CRLF.
pub fn parse_req(req: &mut Request, buf: &mut Buffer) -> ParseResult<()> {
    if req.rstate == ReqState::Created {
        req.rstate = ReqState::Parsing;
    }
    debug_assert_eq!(req.rstate, ReqState::Parsing);

    if req.pstate == ParseState::Hdr {
        let consumed = match parse_req_hdr(req, buf.as_slice()) {
            Ok(n) => n,
            Err(ParseError::Empty) => return Err(ParseError::Invalid("empty request")),
            Err(e) => return Err(e),
        };
        buf.consume(consumed);

        if req.rtype.has_val() {
            req.pstate = ParseState::Val;
        } else {
            req.rstate = ReqState::Parsed;
            return Ok(());
        }
    }

    let consumed = parse_val(&mut req.vstr, buf.as_slice(), req.vlen as usize)?;
    buf.consume(consumed);
    req.rstate = ReqState::Parsed;
    Ok(())
}

/// Read exactly `vlen` octets plus CRLF into `out`.
fn parse_val(out: &mut Vec<u8>, bytes: &[u8], vlen: usize) -> ParseResult<usize> {
    if bytes.len() < vlen + 2 {
        return Err(ParseError::Unfin);
    }
    if &bytes[vlen..vlen + 2] != b"\r\n" {
        return Err(ParseError::Invalid("bad data chunk"));
    }
    out.clear();
    out.extend_from_slice(&bytes[..vlen]);
    Ok(vlen + 2)
}

fn parse_req_hdr(req: &mut Request, bytes: &[u8]) -> ParseResult<usize> {
    let mut t = Tokens::new(bytes);

    let (verb, mut end) = t.field().map_err(|e| match e {
        // an empty line is a malformed request, not a boundary
        ParseError::Empty => ParseError::Invalid("empty request"),
        other => other,
    })?;

    req.rtype = req_type(verb).ok_or(ParseError::Invalid("unknown command"))?;
    req.keys.clear();
    req.noreply = false;

    match req.rtype {
        RequestType::Get | RequestType::Gets => {
            if end {
                return Err(ParseError::Other("missing field(s) in retrieve command"));
            }
            end = subrequest_retrieve(&mut t, req)?;
        }

        RequestType::Delete => {
            if end {
                return Err(ParseError::Other("missing field(s) in delete command"));
            }
            end = subrequest_delete(&mut t, req)?;
        }

        RequestType::Set
        | RequestType::Add
        | RequestType::Replace
        | RequestType::Append
        | RequestType::Prepend => {
            if end {
                return Err(ParseError::Other("missing field(s) in store command"));
            }
            end = subrequest_store(&mut t, req, false)?;
        }

        RequestType::Cas => {
            if end {
                return Err(ParseError::Other("missing field(s) in store command"));
            }
            end = subrequest_store(&mut t, req, true)?;
        }

        RequestType::Incr | RequestType::Decr => {
            if end {
                return Err(ParseError::Other("missing field(s) in arithmetic command"));
            }
            end = subrequest_arithmetic(&mut t, req)?;
        }

        RequestType::Flush => {
            if !end {
                end = subrequest_flush(&mut t, req)?;
            }
        }

        RequestType::Quit => {}

        _ => return Err(ParseError::Invalid("unknown command")),
    }

    if !end {
        t.expect_eol()?;
    }

    Ok(t.pos)
}

/// `<key>+` — keys until end of line, bounded by the batch limit.
fn subrequest_retrieve(t: &mut Tokens, req: &mut Request) -> ParseResult<bool> {
    loop {
        match t.next()? {
            Tok::Field(key, end) => {
                push_key(req, key)?;
                if end {
                    return Ok(true);
                }
            }
            Tok::Eol => {
                if req.keys.is_empty() {
                    return Err(ParseError::Other("missing field(s) in retrieve command"));
                }
                return Ok(true);
            }
        }
    }
}

/// `<key> [noreply]`
fn subrequest_delete(t: &mut Tokens, req: &mut Request) -> ParseResult<bool> {
    let (key, end) = t
        .field()
        .map_err(empty_as(ParseError::Other("missing field(s) in delete command")))?;
    push_key(req, key)?;
    if end {
        return Ok(true);
    }
    chase_noreply(t, req)
}

/// `<key> <flag> <expire> <vlen> [<cas>] [noreply]`
fn subrequest_store(t: &mut Tokens, req: &mut Request, cas: bool) -> ParseResult<bool> {
    let missing = ParseError::Other("missing field(s) in store command");

    let (key, end) = t.field().map_err(empty_as(missing))?;
    push_key(req, key)?;
    if end {
        return Err(missing);
    }

    let (tok, end) = t.field().map_err(empty_as(missing))?;
    req.flag = parse_uint(tok, u32::MAX as u64)? as u32;
    if end {
        return Err(missing);
    }

    let (tok, end) = t.field().map_err(empty_as(missing))?;
    req.expiry = parse_uint(tok, u32::MAX as u64)? as u32;
    if end {
        return Err(missing);
    }

    let (tok, mut end) = t.field().map_err(empty_as(missing))?;
    req.vlen = parse_uint(tok, u32::MAX as u64)? as u32;

    if cas {
        if end {
            return Err(missing);
        }
        let (tok, e) = t.field().map_err(empty_as(missing))?;
        req.vcas = parse_uint(tok, u64::MAX)?;
        end = e;
    }

    if end {
        return Ok(true);
    }
    chase_noreply(t, req)
}

/// `<key> <delta> [noreply]`
fn subrequest_arithmetic(t: &mut Tokens, req: &mut Request) -> ParseResult<bool> {
    let missing = ParseError::Other("missing field(s) in arithmetic command");

    let (key, end) = t.field().map_err(empty_as(missing))?;
    push_key(req, key)?;
    if end {
        return Err(missing);
    }

    let (tok, end) = t.field().map_err(empty_as(missing))?;
    req.delta = parse_uint(tok, u64::MAX)?;

    if end {
        return Ok(true);
    }
    chase_noreply(t, req)
}

/// `[delay] [noreply]` — the delay is parsed and stored; whether a nonzero
/// delay is honored is the execution layer's decision.
fn subrequest_flush(t: &mut Tokens, req: &mut Request) -> ParseResult<bool> {
    match t.next()? {
        Tok::Eol => Ok(true),
        Tok::Field(tok, end) => {
            if tok == b"noreply" {
                req.noreply = true;
                return Ok(end);
            }
            req.expiry = parse_uint(tok, u32::MAX as u64)? as u32;
            if end {
                return Ok(true);
            }
            chase_noreply(t, req)
        }
    }
}

/// Optional trailing `noreply`. An end-of-line here is fine.
fn chase_noreply(t: &mut Tokens, req: &mut Request) -> ParseResult<bool> {
    match t.next()? {
        Tok::Eol => Ok(true),
        Tok::Field(tok, end) => {
            if tok == b"noreply" {
                req.noreply = true;
                Ok(end)
            } else {
                Err(ParseError::Invalid("unexpected token"))
            }
        }
    }
}

fn push_key(req: &mut Request, key: &[u8]) -> ParseResult<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(ParseError::Other("key too long"));
    }
    if req.keys.len() >= MAX_BATCH_SIZE {
        return Err(ParseError::Other("too many keys in a batch"));
    }
    req.keys.push(key.to_vec());
    Ok(())
}

fn empty_as(err: ParseError) -> impl Fn(ParseError) -> ParseError {
    move |e| match e {
        ParseError::Empty => err,
        other => other,
    }
}

fn parse_uint(tok: &[u8], max: u64) -> ParseResult<u64> {
    debug_assert!(!tok.is_empty());
    let mut num = 0u64;
    for &c in tok {
        if !c.is_ascii_digit() {
            return Err(ParseError::Invalid("non-digit char in integer field"));
        }
        if num > max / 10 {
            return Err(ParseError::Invalid("integer too big"));
        }
        num = num
            .checked_mul(10)
            .and_then(|n| n.checked_add(u64::from(c - b'0')))
            .ok_or(ParseError::Invalid("integer too big"))?;
    }
    if num > max {
        return Err(ParseError::Invalid("integer too big"));
    }
    Ok(num)
}

fn req_type(verb: &[u8]) -> Option<RequestType> {
    match verb {
        b"get" => Some(RequestType::Get),
        b"gets" => Some(RequestType::Gets),
        b"set" => Some(RequestType::Set),
        b"add" => Some(RequestType::Add),
        b"replace" => Some(RequestType::Replace),
        b"append" => Some(RequestType::Append),
        b"prepend" => Some(RequestType::Prepend),
        b"cas" => Some(RequestType::Cas),
        b"incr" => Some(RequestType::Incr),
        b"decr" => Some(RequestType::Decr),
        b"delete" => Some(RequestType::Delete),
        b"flush_all" => Some(RequestType::Flush),
        b"quit" => Some(RequestType::Quit),
        _ => None,
    }
}

/// One token from a header line.
enum Tok<'a> {
    /// A field and whether it was terminated by the line's CRLF.
    Field(&'a [u8], bool),
    /// The line ended with no further field.
    Eol,
}

/// Whitespace-separated tokenizer over one CRLF-terminated line.
struct Tokens<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Next token. CRLF is special: a lone CR at the buffer end is a short
    /// read, and a CR not followed by LF counts as a token byte, exactly as
    /// a resumed read would see it.
    fn next(&mut self) -> ParseResult<Tok<'a>> {
        // pre-token spaces
        while self.bytes.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }

        let start = self.pos;
        loop {
            if self.pos - start > MAX_TOKEN_LEN {
                return Err(ParseError::Other("oversized token"));
            }
            match self.bytes.get(self.pos) {
                None => return Err(ParseError::Unfin),
                Some(b' ') => {
                    let tok = &self.bytes[start..self.pos];
                    self.pos += 1;
                    return Ok(Tok::Field(tok, false));
                }
                Some(b'\r') => {
                    match self.bytes.get(self.pos + 1) {
                        None => return Err(ParseError::Unfin),
                        Some(b'\n') => {
                            let tok = &self.bytes[start..self.pos];
                            self.pos += 2;
                            if tok.is_empty() {
                                return Ok(Tok::Eol);
                            }
                            return Ok(Tok::Field(tok, true));
                        }
                        // CR inside a token
                        Some(_) => self.pos += 1,
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Next token, where the line ending instead is an `Empty` boundary.
    fn field(&mut self) -> ParseResult<(&'a [u8], bool)> {
        match self.next()? {
            Tok::Field(tok, end) => Ok((tok, end)),
            Tok::Eol => Err(ParseError::Empty),
        }
    }

    /// Require the line to end here, allowing trailing spaces.
    fn expect_eol(&mut self) -> ParseResult<()> {
        match self.next()? {
            Tok::Eol => Ok(()),
            Tok::Field(..) => Err(ParseError::Invalid("unexpected token")),
        }
    }
}

/// Parse one response out of `buf` into `rsp` (client side).
pub fn parse_rsp(rsp: &mut Response, buf: &mut Buffer) -> ParseResult<()> {
    if rsp.rstate == ReqState::Created {
        rsp.rstate = ReqState::Parsing;
    }

    if rsp.pstate == ParseState::Hdr {
        let consumed = match parse_rsp_hdr(rsp, buf.as_slice()) {
            Ok(n) => n,
            Err(ParseError::Empty) => return Err(ParseError::Invalid("empty response")),
            Err(e) => return Err(e),
        };
        buf.consume(consumed);

        if rsp.rtype == ResponseType::Value {
            rsp.pstate = ParseState::Val;
        } else {
            rsp.rstate = ReqState::Parsed;
            return Ok(());
        }
    }

    let consumed = parse_val(&mut rsp.vstr, buf.as_slice(), rsp.vlen as usize)?;
    buf.consume(consumed);
    rsp.rstate = ReqState::Parsed;
    Ok(())
}

fn parse_rsp_hdr(rsp: &mut Response, bytes: &[u8]) -> ParseResult<usize> {
    let mut t = Tokens::new(bytes);

    // a leading digit means a bare numeric (incr/decr result)
    if bytes.first().is_some_and(|c| c.is_ascii_digit()) {
        let (tok, end) = t.field()?;
        rsp.rtype = ResponseType::Numeric;
        rsp.num = true;
        rsp.vint = parse_uint(tok, u64::MAX)?;
        if !end {
            t.expect_eol()?;
        }
        return Ok(t.pos);
    }

    let (word, mut end) = t.field()?;
    rsp.rtype = rsp_type(word).ok_or(ParseError::Invalid("unknown response"))?;

    match rsp.rtype {
        ResponseType::Value => {
            let missing = ParseError::Other("missing field(s) in value response");
            if end {
                return Err(missing);
            }

            let (key, e) = t.field().map_err(empty_as(missing))?;
            if key.len() > MAX_KEY_LEN {
                return Err(ParseError::Other("key too long"));
            }
            rsp.key.clear();
            rsp.key.extend_from_slice(key);
            if e {
                return Err(missing);
            }

            let (tok, e) = t.field().map_err(empty_as(missing))?;
            rsp.flag = parse_uint(tok, u32::MAX as u64)? as u32;
            if e {
                return Err(missing);
            }

            let (tok, e) = t.field().map_err(empty_as(missing))?;
            rsp.vlen = parse_uint(tok, u32::MAX as u64)? as u32;
            end = e;

            // optional cas
            if !end {
                match t.next()? {
                    Tok::Eol => end = true,
                    Tok::Field(tok, e) => {
                        rsp.vcas = parse_uint(tok, u64::MAX)?;
                        rsp.cas = true;
                        end = e;
                    }
                }
            }
        }

        ResponseType::ClientError | ResponseType::ServerError => {
            if !end {
                let msg_end = chase_error_line(&mut t)?;
                rsp.vstr.clear();
                rsp.vstr.extend_from_slice(msg_end);
                end = true;
            }
        }

        ResponseType::Ok
        | ResponseType::End
        | ResponseType::Stored
        | ResponseType::NotStored
        | ResponseType::Exists
        | ResponseType::Deleted
        | ResponseType::NotFound => {}

        _ => return Err(ParseError::Invalid("unknown response")),
    }

    if !end {
        t.expect_eol()?;
    }

    Ok(t.pos)
}

/// The remainder of an error line, spaces included, up to CRLF.
fn chase_error_line<'a>(t: &mut Tokens<'a>) -> ParseResult<&'a [u8]> {
    while t.bytes.get(t.pos) == Some(&b' ') {
        t.pos += 1;
    }
    let start = t.pos;
    loop {
        match t.bytes.get(t.pos) {
            None => return Err(ParseError::Unfin),
            Some(b'\r') => match t.bytes.get(t.pos + 1) {
                None => return Err(ParseError::Unfin),
                Some(b'\n') => {
                    let msg = &t.bytes[start..t.pos];
                    t.pos += 2;
                    return Ok(msg);
                }
                Some(_) => t.pos += 1,
            },
            Some(_) => t.pos += 1,
        }
    }
}

fn rsp_type(word: &[u8]) -> Option<ResponseType> {
    match word {
        b"OK" => Some(ResponseType::Ok),
        b"END" => Some(ResponseType::End),
        b"VALUE" => Some(ResponseType::Value),
        b"STORED" => Some(ResponseType::Stored),
        b"NOT_STORED" => Some(ResponseType::NotStored),
        b"EXISTS" => Some(ResponseType::Exists),
        b"DELETED" => Some(ResponseType::Deleted),
        b"NOT_FOUND" => Some(ResponseType::NotFound),
        b"CLIENT_ERROR" => Some(ResponseType::ClientError),
        b"SERVER_ERROR" => Some(ResponseType::ServerError),
        _ => None,
    }
}
