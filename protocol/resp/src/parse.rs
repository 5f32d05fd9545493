//! Incremental request parsing.

use buffer::Buffer;
use protocol_common::{
    MAX_BATCH_SIZE, MAX_KEY_LEN, ParseError, ParseResult, ParseState, ReqState, Request,
    RequestType,
};

/// Parse one request out of `buf` into `req`.
///
/// On [`ParseError::Unfin`] nothing is consumed from the current parse
/// state and the call is resumable with the same `req`. On success the
/// request bytes are consumed and `req.rstate` is `Parsed`. Errors other
/// than `Unfin` leave the read position at the start of the failed parse
/// state; the caller reports the error and drops the connection.
pub fn parse_req(req: &mut Request, buf: &mut Buffer) -> ParseResult<()> {
    if req.rstate == ReqState::Created {
        req.rstate = ReqState::Parsing;
    }
    debug_assert_eq!(req.rstate, ReqState::Parsing);

    if req.pstate == ParseState::Hdr {
        let consumed = match parse_hdr(req, buf.as_slice()) {
            Ok(n) => n,
            Err(ParseError::Empty) => return Err(ParseError::Invalid("empty token")),
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

    // Value bulk for storage verbs.
    let consumed = {
        let mut cur = Cursor::new(buf.as_slice());
        let val = match cur.read_bulk() {
            Ok(v) => v,
            Err(ParseError::Empty) => return Err(ParseError::Invalid("empty token")),
            Err(e) => return Err(e),
        };
        req.vstr.clear();
        req.vstr.extend_from_slice(val);
        req.vlen = val.len() as u32;
        cur.pos
    };
    buf.consume(consumed);
    req.rstate = ReqState::Parsed;
    Ok(())
}

/// Parse the array header through the last non-value argument.
///
/// Returns the number of bytes the header occupies; the caller consumes
/// them only on success, so a resumed call re-reads from the array marker.
fn parse_hdr(req: &mut Request, bytes: &[u8]) -> ParseResult<usize> {
    let mut cur = Cursor::new(bytes);

    match cur.peek() {
        None => return Err(ParseError::Unfin),
        Some(b'*') => cur.pos += 1,
        Some(_) => return Err(ParseError::Invalid("expected array header")),
    }

    let nelem = cur.read_uint_line(u64::MAX)?;
    if nelem == 0 {
        return Err(ParseError::Invalid("empty array"));
    }
    if nelem as usize > MAX_BATCH_SIZE + 1 {
        return Err(ParseError::Other("too many keys in a batch"));
    }

    let verb = cur.read_bulk()?;
    req.rtype = req_type(verb).ok_or(ParseError::Invalid("unknown command"))?;
    req.keys.clear();

    match req.rtype {
        RequestType::Quit | RequestType::Flush => {
            if nelem != 1 {
                return Err(ParseError::Other("wrong number of arguments"));
            }
        }

        RequestType::Get | RequestType::Mget => {
            if nelem < 2 {
                return Err(ParseError::Other("missing key in retrieve command"));
            }
            for _ in 0..nelem - 1 {
                let key = cur.read_bulk()?;
                if key.len() > MAX_KEY_LEN {
                    return Err(ParseError::Other("oversized key"));
                }
                req.keys.push(key.to_vec());
            }
        }

        RequestType::Delete => {
            if nelem != 2 {
                return Err(ParseError::Other("wrong number of arguments"));
            }
            let key = cur.read_bulk()?;
            if key.len() > MAX_KEY_LEN {
                return Err(ParseError::Other("oversized key"));
            }
            req.keys.push(key.to_vec());
        }

        RequestType::Incr | RequestType::Decr => {
            if nelem != 3 {
                return Err(ParseError::Other("wrong number of arguments"));
            }
            let key = cur.read_bulk()?;
            if key.len() > MAX_KEY_LEN {
                return Err(ParseError::Other("oversized key"));
            }
            req.keys.push(key.to_vec());
            req.delta = cur.read_bulk_uint(u64::MAX)?;
        }

        RequestType::Set => {
            if nelem != 3 {
                return Err(ParseError::Other("wrong number of arguments"));
            }
            let key = cur.read_bulk()?;
            if key.len() > MAX_KEY_LEN {
                return Err(ParseError::Other("oversized key"));
            }
            req.keys.push(key.to_vec());
            // value bulk is read in the VAL state
        }

        _ => return Err(ParseError::Invalid("unknown command")),
    }

    Ok(cur.pos)
}

fn req_type(verb: &[u8]) -> Option<RequestType> {
    if verb.eq_ignore_ascii_case(b"get") {
        Some(RequestType::Get)
    } else if verb.eq_ignore_ascii_case(b"mget") {
        Some(RequestType::Mget)
    } else if verb.eq_ignore_ascii_case(b"set") {
        Some(RequestType::Set)
    } else if verb.eq_ignore_ascii_case(b"delete") {
        Some(RequestType::Delete)
    } else if verb.eq_ignore_ascii_case(b"incrby") {
        Some(RequestType::Incr)
    } else if verb.eq_ignore_ascii_case(b"decrby") {
        Some(RequestType::Decr)
    } else if verb.eq_ignore_ascii_case(b"flush") {
        Some(RequestType::Flush)
    } else if verb.eq_ignore_ascii_case(b"quit") {
        Some(RequestType::Quit)
    } else {
        None
    }
}

/// Read-only cursor over the unread region of the buffer.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// CRLF needs a peek into the future: a lone CR at the end of the
    /// buffer is a short read, not an error.
    fn expect_crlf(&mut self) -> ParseResult<()> {
        match self.peek() {
            None => return Err(ParseError::Unfin),
            Some(b'\r') => {}
            Some(_) => return Err(ParseError::Invalid("expected CRLF")),
        }
        if self.remaining() < 2 {
            return Err(ParseError::Unfin);
        }
        if self.bytes[self.pos + 1] != b'\n' {
            return Err(ParseError::Invalid("expected CRLF"));
        }
        self.pos += 2;
        Ok(())
    }

    /// Decimal digits terminated by CRLF. Overflow is rejected at
    /// `max / 10` before the shift-add.
    fn read_uint_line(&mut self, max: u64) -> ParseResult<u64> {
        let mut num = 0u64;
        let mut ndigits = 0usize;

        loop {
            match self.peek() {
                None => return Err(ParseError::Unfin),
                Some(c) if c.is_ascii_digit() => {
                    if num > max / 10 {
                        return Err(ParseError::Invalid("integer too big"));
                    }
                    num = num
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(u64::from(c - b'0')))
                        .ok_or(ParseError::Invalid("integer too big"))?;
                    ndigits += 1;
                    self.pos += 1;
                }
                Some(_) => break,
            }
        }

        if ndigits == 0 {
            return Err(ParseError::Empty);
        }
        if num > max {
            return Err(ParseError::Invalid("integer too big"));
        }
        self.expect_crlf()?;
        Ok(num)
    }

    /// `$<len>\r\n<bytes[len]>\r\n`
    fn read_bulk(&mut self) -> ParseResult<&'a [u8]> {
        match self.peek() {
            None => return Err(ParseError::Unfin),
            Some(b'$') => self.pos += 1,
            Some(_) => return Err(ParseError::Invalid("expected bulk string")),
        }

        let len = self.read_uint_line(u64::MAX)? as usize;
        if self.remaining() < len + 2 {
            return Err(ParseError::Unfin);
        }

        let data = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        self.expect_crlf()?;
        Ok(data)
    }

    /// A bulk whose payload must be a decimal integer.
    fn read_bulk_uint(&mut self, max: u64) -> ParseResult<u64> {
        let s = self.read_bulk()?;
        if s.is_empty() {
            return Err(ParseError::Invalid("no integer provided"));
        }
        if s.len() > 20 {
            return Err(ParseError::Invalid("integer too big"));
        }

        let mut num = 0u64;
        for &c in s {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_uint_line() {
        let mut cur = Cursor::new(b"123\r\nrest");
        assert_eq!(cur.read_uint_line(u64::MAX), Ok(123));
        assert_eq!(cur.pos, 5);
    }

    #[test]
    fn test_cursor_uint_short() {
        let mut cur = Cursor::new(b"123");
        assert_eq!(cur.read_uint_line(u64::MAX), Err(ParseError::Unfin));

        // CR without LF yet received
        let mut cur = Cursor::new(b"123\r");
        assert_eq!(cur.read_uint_line(u64::MAX), Err(ParseError::Unfin));
    }

    #[test]
    fn test_cursor_uint_empty() {
        let mut cur = Cursor::new(b"\r\n");
        assert_eq!(cur.read_uint_line(u64::MAX), Err(ParseError::Empty));
    }

    #[test]
    fn test_cursor_bulk() {
        let mut cur = Cursor::new(b"$5\r\nhello\r\n");
        assert_eq!(cur.read_bulk(), Ok(&b"hello"[..]));
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn test_cursor_bulk_short_payload() {
        let mut cur = Cursor::new(b"$5\r\nhel");
        assert_eq!(cur.read_bulk(), Err(ParseError::Unfin));
    }

    #[test]
    fn test_cursor_bulk_bad_marker() {
        let mut cur = Cursor::new(b"#5\r\n");
        assert!(matches!(cur.read_bulk(), Err(ParseError::Invalid(_))));
    }
}
