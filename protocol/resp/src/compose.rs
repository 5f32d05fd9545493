//! Response and request composition.
//!
//! Composers estimate an upper bound on the message size, grow the buffer
//! once, then write without further checks. Overestimation (decimal fields
//! sized at their maximum width) is deliberate; the margin is a few tens of
//! bytes per message.

use buffer::Buffer;
use protocol_common::{ComposeError, Request, RequestType, Response, ResponseType};

const CRLF: &[u8] = b"\r\n";

/// Maximum decimal width of a u64, including room for a sign.
const UINT64_MAXLEN: usize = 20;

/// Per-bulk overhead: marker + max length digits + two CRLFs.
const BULK_OVERHEAD: usize = 1 + UINT64_MAXLEN + 2 + 2;

fn verb(rtype: RequestType) -> &'static [u8] {
    match rtype {
        RequestType::Get => b"get",
        RequestType::Mget => b"mget",
        RequestType::Set => b"set",
        RequestType::Delete => b"delete",
        RequestType::Incr => b"incrby",
        RequestType::Decr => b"decrby",
        RequestType::Flush => b"flush",
        RequestType::Quit => b"quit",
        _ => b"",
    }
}

fn write_length(buf: &mut Buffer, n: usize) -> Result<usize, ComposeError> {
    let mut digits = itoa::Buffer::new();
    let digits = digits.format(n).as_bytes();
    let mut written = buf.write_slice(b"*")?;
    written += buf.write_slice(digits)?;
    written += buf.write_slice(CRLF)?;
    Ok(written)
}

fn write_bulk(buf: &mut Buffer, data: &[u8]) -> Result<usize, ComposeError> {
    let mut digits = itoa::Buffer::new();
    let digits = digits.format(data.len()).as_bytes();
    let mut written = buf.write_slice(b"$")?;
    written += buf.write_slice(digits)?;
    written += buf.write_slice(CRLF)?;
    written += buf.write_slice(data)?;
    written += buf.write_slice(CRLF)?;
    Ok(written)
}

fn write_simple(buf: &mut Buffer, marker: &[u8], data: &[u8]) -> Result<usize, ComposeError> {
    let mut written = buf.write_slice(marker)?;
    written += buf.write_slice(data)?;
    written += buf.write_slice(CRLF)?;
    Ok(written)
}

fn write_integer(buf: &mut Buffer, val: u64) -> Result<usize, ComposeError> {
    let mut digits = itoa::Buffer::new();
    let digits = digits.format(val).as_bytes();
    let mut written = buf.write_slice(b":")?;
    written += buf.write_slice(digits)?;
    written += buf.write_slice(CRLF)?;
    Ok(written)
}

/// Write an array header `*<n>\r\n`.
///
/// Used by the execution layer to frame a multi-value reply ahead of the
/// per-key bulks it composes individually.
pub fn compose_array_header(buf: &mut Buffer, n: usize) -> Result<usize, ComposeError> {
    buf.reserve(1 + UINT64_MAXLEN + 2)?;
    write_length(buf, n)
}

/// Compose a request (client side). Returns the number of bytes written.
pub fn compose_req(buf: &mut Buffer, req: &Request) -> Result<usize, ComposeError> {
    let verb = verb(req.rtype);
    let mut n = 0;

    match req.rtype {
        RequestType::Quit | RequestType::Flush => {
            buf.reserve(1 + UINT64_MAXLEN + 2 + BULK_OVERHEAD + verb.len())?;
            n += write_length(buf, 1)?;
            n += write_bulk(buf, verb)?;
        }

        RequestType::Get | RequestType::Mget | RequestType::Delete => {
            let keys_sz: usize = req.keys.iter().map(|k| BULK_OVERHEAD + k.len()).sum();
            buf.reserve(1 + UINT64_MAXLEN + 2 + BULK_OVERHEAD + verb.len() + keys_sz)?;
            n += write_length(buf, 1 + req.keys.len())?;
            n += write_bulk(buf, verb)?;
            for key in &req.keys {
                n += write_bulk(buf, key)?;
            }
        }

        RequestType::Incr | RequestType::Decr => {
            buf.reserve(
                1 + UINT64_MAXLEN
                    + 2
                    + BULK_OVERHEAD * 3
                    + verb.len()
                    + req.key().len()
                    + UINT64_MAXLEN,
            )?;
            n += write_length(buf, 3)?;
            n += write_bulk(buf, verb)?;
            n += write_bulk(buf, req.key())?;
            let mut digits = itoa::Buffer::new();
            n += write_bulk(buf, digits.format(req.delta).as_bytes())?;
        }

        RequestType::Set => {
            buf.reserve(
                1 + UINT64_MAXLEN
                    + 2
                    + BULK_OVERHEAD * 3
                    + verb.len()
                    + req.key().len()
                    + req.vstr.len(),
            )?;
            n += write_length(buf, 3)?;
            n += write_bulk(buf, verb)?;
            n += write_bulk(buf, req.key())?;
            n += write_bulk(buf, &req.vstr)?;
        }

        _ => {
            debug_assert!(false, "verb has no RESP rendering: {:?}", req.rtype);
        }
    }

    Ok(n)
}

/// Compose a response. Returns the number of bytes written.
pub fn compose_rsp(buf: &mut Buffer, rsp: &Response) -> Result<usize, ComposeError> {
    match rsp.rtype {
        ResponseType::Ok | ResponseType::Stored => {
            buf.reserve(5)?;
            write_simple(buf, b"+", b"OK")
        }

        ResponseType::Value => {
            buf.reserve(BULK_OVERHEAD + rsp.vstr.len())?;
            write_bulk(buf, &rsp.vstr)
        }

        ResponseType::NotFound => {
            // nil bulk
            buf.reserve(5)?;
            buf.write_slice(b"$-1\r\n").map_err(ComposeError::from)
        }

        ResponseType::Numeric => {
            buf.reserve(1 + UINT64_MAXLEN + 2)?;
            write_integer(buf, rsp.vint)
        }

        ResponseType::Deleted => {
            buf.reserve(4)?;
            write_integer(buf, 1)
        }

        ResponseType::ClientError | ResponseType::ServerError => {
            buf.reserve(1 + rsp.vstr.len() + 2)?;
            write_simple(buf, b"-", &rsp.vstr)
        }

        ResponseType::End => Ok(0),

        _ => {
            debug_assert!(false, "response has no RESP rendering: {:?}", rsp.rtype);
            Ok(0)
        }
    }
}
