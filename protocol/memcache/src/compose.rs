//! Request and response composition.
//!
//! Composers size the message with decimal fields at maximum width, grow
//! the buffer once, then write. The margin is bounded (two 32-bit and one
//! 64-bit field at most), so the overestimate never costs more than a few
//! tens of bytes.

use buffer::Buffer;
use protocol_common::{ComposeError, Request, RequestType, Response, ResponseType};

const CRLF: &[u8] = b"\r\n";
const UINT64_MAXLEN: usize = 20;

fn write_uint(buf: &mut Buffer, val: u64) -> Result<usize, ComposeError> {
    let mut digits = itoa::Buffer::new();
    Ok(buf.write_slice(digits.format(val).as_bytes())?)
}

fn verb(rtype: RequestType) -> &'static [u8] {
    match rtype {
        RequestType::Get => b"get",
        RequestType::Gets => b"gets",
        RequestType::Set => b"set",
        RequestType::Add => b"add",
        RequestType::Replace => b"replace",
        RequestType::Append => b"append",
        RequestType::Prepend => b"prepend",
        RequestType::Cas => b"cas",
        RequestType::Incr => b"incr",
        RequestType::Decr => b"decr",
        RequestType::Delete => b"delete",
        RequestType::Flush => b"flush_all",
        RequestType::Quit => b"quit",
        _ => b"",
    }
}

/// Compose a request (client side). Returns the number of bytes written.
pub fn compose_req(buf: &mut Buffer, req: &Request) -> Result<usize, ComposeError> {
    let verb = verb(req.rtype);
    let mut n = 0;

    match req.rtype {
        RequestType::Get | RequestType::Gets => {
            let keys_sz: usize = req.keys.iter().map(|k| 1 + k.len()).sum();
            buf.reserve(verb.len() + keys_sz + 2)?;
            n += buf.write_slice(verb)?;
            for key in &req.keys {
                n += buf.write_slice(b" ")?;
                n += buf.write_slice(key)?;
            }
            n += buf.write_slice(CRLF)?;
        }

        RequestType::Set
        | RequestType::Add
        | RequestType::Replace
        | RequestType::Append
        | RequestType::Prepend
        | RequestType::Cas => {
            buf.reserve(
                verb.len() + 1 + req.key().len() + 4 * (1 + UINT64_MAXLEN) + 8 + 2
                    + req.vstr.len()
                    + 2,
            )?;
            n += buf.write_slice(verb)?;
            n += buf.write_slice(b" ")?;
            n += buf.write_slice(req.key())?;
            n += buf.write_slice(b" ")?;
            n += write_uint(buf, u64::from(req.flag))?;
            n += buf.write_slice(b" ")?;
            n += write_uint(buf, u64::from(req.expiry))?;
            n += buf.write_slice(b" ")?;
            n += write_uint(buf, req.vstr.len() as u64)?;
            if req.rtype == RequestType::Cas {
                n += buf.write_slice(b" ")?;
                n += write_uint(buf, req.vcas)?;
            }
            if req.noreply {
                n += buf.write_slice(b" noreply")?;
            }
            n += buf.write_slice(CRLF)?;
            n += buf.write_slice(&req.vstr)?;
            n += buf.write_slice(CRLF)?;
        }

        RequestType::Incr | RequestType::Decr => {
            buf.reserve(verb.len() + 1 + req.key().len() + 1 + UINT64_MAXLEN + 8 + 2)?;
            n += buf.write_slice(verb)?;
            n += buf.write_slice(b" ")?;
            n += buf.write_slice(req.key())?;
            n += buf.write_slice(b" ")?;
            n += write_uint(buf, req.delta)?;
            if req.noreply {
                n += buf.write_slice(b" noreply")?;
            }
            n += buf.write_slice(CRLF)?;
        }

        RequestType::Delete => {
            buf.reserve(verb.len() + 1 + req.key().len() + 8 + 2)?;
            n += buf.write_slice(verb)?;
            n += buf.write_slice(b" ")?;
            n += buf.write_slice(req.key())?;
            if req.noreply {
                n += buf.write_slice(b" noreply")?;
            }
            n += buf.write_slice(CRLF)?;
        }

        RequestType::Flush => {
            buf.reserve(verb.len() + 1 + UINT64_MAXLEN + 8 + 2)?;
            n += buf.write_slice(verb)?;
            if req.expiry > 0 {
                n += buf.write_slice(b" ")?;
                n += write_uint(buf, u64::from(req.expiry))?;
            }
            if req.noreply {
                n += buf.write_slice(b" noreply")?;
            }
            n += buf.write_slice(CRLF)?;
        }

        RequestType::Quit => {
            buf.reserve(verb.len() + 2)?;
            n += buf.write_slice(verb)?;
            n += buf.write_slice(CRLF)?;
        }

        _ => {
            debug_assert!(false, "verb has no wire rendering: {:?}", req.rtype);
        }
    }

    Ok(n)
}

fn status_line(rtype: ResponseType) -> &'static [u8] {
    match rtype {
        ResponseType::Ok => b"OK",
        ResponseType::End => b"END",
        ResponseType::Stored => b"STORED",
        ResponseType::NotStored => b"NOT_STORED",
        ResponseType::Exists => b"EXISTS",
        ResponseType::Deleted => b"DELETED",
        ResponseType::NotFound => b"NOT_FOUND",
        ResponseType::ClientError => b"CLIENT_ERROR",
        ResponseType::ServerError => b"SERVER_ERROR",
        _ => b"",
    }
}

/// Compose a response. Returns the number of bytes written.
pub fn compose_rsp(buf: &mut Buffer, rsp: &Response) -> Result<usize, ComposeError> {
    let mut n = 0;

    match rsp.rtype {
        ResponseType::Ok
        | ResponseType::End
        | ResponseType::Stored
        | ResponseType::NotStored
        | ResponseType::Exists
        | ResponseType::Deleted
        | ResponseType::NotFound => {
            let line = status_line(rsp.rtype);
            buf.reserve(line.len() + 2)?;
            n += buf.write_slice(line)?;
            n += buf.write_slice(CRLF)?;
        }

        ResponseType::ClientError | ResponseType::ServerError => {
            let line = status_line(rsp.rtype);
            buf.reserve(line.len() + 1 + rsp.vstr.len() + 2)?;
            n += buf.write_slice(line)?;
            n += buf.write_slice(b" ")?;
            n += buf.write_slice(&rsp.vstr)?;
            n += buf.write_slice(CRLF)?;
        }

        ResponseType::Numeric => {
            buf.reserve(UINT64_MAXLEN + 2)?;
            n += write_uint(buf, rsp.vint)?;
            n += buf.write_slice(CRLF)?;
        }

        ResponseType::Value => {
            buf.reserve(
                6 + rsp.key.len() + 3 * (1 + UINT64_MAXLEN) + 2 + rsp.vstr.len() + 2,
            )?;
            n += buf.write_slice(b"VALUE ")?;
            n += buf.write_slice(&rsp.key)?;
            n += buf.write_slice(b" ")?;
            n += write_uint(buf, u64::from(rsp.flag))?;
            n += buf.write_slice(b" ")?;
            n += write_uint(buf, rsp.vstr.len() as u64)?;
            if rsp.cas {
                n += buf.write_slice(b" ")?;
                n += write_uint(buf, rsp.vcas)?;
            }
            n += buf.write_slice(CRLF)?;
            n += buf.write_slice(&rsp.vstr)?;
            n += buf.write_slice(CRLF)?;
        }

        _ => {
            debug_assert!(false, "response has no wire rendering: {:?}", rsp.rtype);
        }
    }

    Ok(n)
}
