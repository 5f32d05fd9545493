//! Request execution: bridges parsed requests to engine operations and
//! composes the response for the connection's protocol.
//!
//! Engine errors map to protocol status lines:
//!
//! | engine error    | memcached flavor                      |
//! |-----------------|---------------------------------------|
//! | `Oversized`     | `CLIENT_ERROR object too large ...`   |
//! | `OutOfMemory`   | `SERVER_ERROR out of memory`          |
//! | `NotNumeric`    | `CLIENT_ERROR cannot increment ...`   |
//! | `Overflow`      | `CLIENT_ERROR numeric value overflow` |

use buffer::Buffer;
use cache_slab::{CacheError, CasOutcome, SlabCache};
use protocol_common::{ComposeError, Request, RequestType, Response, ResponseType};
use tracing::warn;

use crate::config::Protocol;
use crate::metrics::{DELETES, FLUSHES, GETS, HITS, MISSES, SETS};

/// Execute `req` against the engine and compose the reply into `wbuf`.
///
/// Returns `true` when the connection should close (QUIT).
pub fn execute(
    protocol: Protocol,
    req: &Request,
    rsp: &mut Response,
    cache: &mut SlabCache,
    wbuf: &mut Buffer,
) -> Result<bool, ComposeError> {
    match protocol {
        Protocol::Memcache => execute_memcache(req, rsp, cache, wbuf),
        Protocol::Resp => execute_resp(req, rsp, cache, wbuf),
    }
}

fn execute_memcache(
    req: &Request,
    rsp: &mut Response,
    cache: &mut SlabCache,
    wbuf: &mut Buffer,
) -> Result<bool, ComposeError> {
    use protocol_memcache::compose_rsp;

    match req.rtype {
        RequestType::Get | RequestType::Gets => {
            let with_cas = req.rtype == RequestType::Gets;
            for key in &req.keys {
                GETS.increment();
                rsp.reset();
                if let Some(view) = cache.get(key) {
                    HITS.increment();
                    rsp.rtype = ResponseType::Value;
                    rsp.key.extend_from_slice(key);
                    rsp.flag = view.dataflag();
                    rsp.vstr.extend_from_slice(view.value());
                    rsp.cas = with_cas;
                    rsp.vcas = view.cas();
                    compose_rsp(wbuf, rsp)?;
                } else {
                    MISSES.increment();
                }
            }
            rsp.reset();
            rsp.rtype = ResponseType::End;
            compose_rsp(wbuf, rsp)?;
        }

        RequestType::Set => {
            SETS.increment();
            let rtype = match cache.set(req.key(), &req.vstr, req.flag, req.expiry) {
                Ok(()) => ResponseType::Stored,
                Err(e) => error_rsp(rsp, e),
            };
            reply_status(rsp, rtype, req.noreply, wbuf)?;
        }

        RequestType::Add => {
            SETS.increment();
            let rtype = if cache.contains(req.key()) {
                ResponseType::NotStored
            } else {
                match cache.insert(req.key(), &req.vstr, req.flag, req.expiry) {
                    Ok(()) => ResponseType::Stored,
                    Err(e) => error_rsp(rsp, e),
                }
            };
            reply_status(rsp, rtype, req.noreply, wbuf)?;
        }

        RequestType::Replace => {
            SETS.increment();
            let rtype = match cache.update(req.key(), &req.vstr, req.flag, req.expiry) {
                Ok(true) => ResponseType::Stored,
                Ok(false) => ResponseType::NotStored,
                Err(e) => error_rsp(rsp, e),
            };
            reply_status(rsp, rtype, req.noreply, wbuf)?;
        }

        RequestType::Append | RequestType::Prepend => {
            SETS.increment();
            let append = req.rtype == RequestType::Append;
            let rtype = match cache.annex(req.key(), &req.vstr, append) {
                Ok(true) => ResponseType::Stored,
                Ok(false) => ResponseType::NotStored,
                Err(e) => error_rsp(rsp, e),
            };
            reply_status(rsp, rtype, req.noreply, wbuf)?;
        }

        RequestType::Cas => {
            SETS.increment();
            let rtype = match cache.cas(req.key(), &req.vstr, req.flag, req.expiry, req.vcas) {
                Ok(CasOutcome::Stored) => ResponseType::Stored,
                Ok(CasOutcome::Exists) => ResponseType::Exists,
                Ok(CasOutcome::NotFound) => ResponseType::NotFound,
                Err(e) => error_rsp(rsp, e),
            };
            reply_status(rsp, rtype, req.noreply, wbuf)?;
        }

        RequestType::Incr | RequestType::Decr => {
            let incr = req.rtype == RequestType::Incr;
            rsp.reset();
            let rtype = match cache.delta(req.key(), req.delta, incr) {
                Ok(Some(value)) => {
                    rsp.num = true;
                    rsp.vint = value;
                    ResponseType::Numeric
                }
                Ok(None) => ResponseType::NotFound,
                Err(e) => error_rsp(rsp, e),
            };
            if !req.noreply {
                rsp.rtype = rtype;
                compose_rsp(wbuf, rsp)?;
            }
        }

        RequestType::Delete => {
            DELETES.increment();
            let rtype = if cache.delete(req.key()) {
                ResponseType::Deleted
            } else {
                ResponseType::NotFound
            };
            reply_status(rsp, rtype, req.noreply, wbuf)?;
        }

        RequestType::Flush => {
            FLUSHES.increment();
            let rtype = if req.expiry != 0 {
                // the wire grammar admits a delay; delayed flush is not
                // supported
                rsp.reset();
                rsp.vstr.extend_from_slice(b"flush delay not supported");
                ResponseType::ClientError
            } else {
                cache.flush();
                ResponseType::Ok
            };
            reply_status(rsp, rtype, req.noreply, wbuf)?;
        }

        RequestType::Quit => return Ok(true),

        RequestType::Mget | RequestType::Unknown => {
            warn!(rtype = ?req.rtype, "verb not served on this protocol");
            rsp.reset();
            rsp.vstr.extend_from_slice(b"unknown command");
            rsp.rtype = ResponseType::ClientError;
            protocol_memcache::compose_rsp(wbuf, rsp)?;
        }
    }

    Ok(false)
}

fn execute_resp(
    req: &Request,
    rsp: &mut Response,
    cache: &mut SlabCache,
    wbuf: &mut Buffer,
) -> Result<bool, ComposeError> {
    use protocol_resp::{compose_array_header, compose_rsp};

    match req.rtype {
        RequestType::Get | RequestType::Mget => {
            // a single-key get answers with one bulk; anything else is an
            // array of bulks
            let as_array = req.rtype == RequestType::Mget || req.keys.len() > 1;
            if as_array {
                compose_array_header(wbuf, req.keys.len())?;
            }
            for key in &req.keys {
                GETS.increment();
                rsp.reset();
                if let Some(view) = cache.get(key) {
                    HITS.increment();
                    rsp.rtype = ResponseType::Value;
                    rsp.vstr.extend_from_slice(view.value());
                } else {
                    MISSES.increment();
                    rsp.rtype = ResponseType::NotFound;
                }
                compose_rsp(wbuf, rsp)?;
            }
        }

        RequestType::Set => {
            SETS.increment();
            rsp.reset();
            rsp.rtype = match cache.set(req.key(), &req.vstr, 0, 0) {
                Ok(()) => ResponseType::Ok,
                Err(e) => resp_error(rsp, e),
            };
            compose_rsp(wbuf, rsp)?;
        }

        RequestType::Delete => {
            DELETES.increment();
            rsp.reset();
            rsp.rtype = ResponseType::Numeric;
            rsp.num = true;
            rsp.vint = u64::from(cache.delete(req.key()));
            compose_rsp(wbuf, rsp)?;
        }

        RequestType::Incr | RequestType::Decr => {
            let incr = req.rtype == RequestType::Incr;
            rsp.reset();
            rsp.rtype = match cache.delta(req.key(), req.delta, incr) {
                Ok(Some(value)) => {
                    rsp.num = true;
                    rsp.vint = value;
                    ResponseType::Numeric
                }
                Ok(None) => {
                    // arithmetic on a missing key answers nil
                    ResponseType::NotFound
                }
                Err(e) => resp_error(rsp, e),
            };
            compose_rsp(wbuf, rsp)?;
        }

        RequestType::Flush => {
            FLUSHES.increment();
            cache.flush();
            rsp.reset();
            rsp.rtype = ResponseType::Ok;
            compose_rsp(wbuf, rsp)?;
        }

        RequestType::Quit => {
            rsp.reset();
            rsp.rtype = ResponseType::Ok;
            compose_rsp(wbuf, rsp)?;
            return Ok(true);
        }

        _ => {
            rsp.reset();
            rsp.rtype = ResponseType::ClientError;
            rsp.vstr.extend_from_slice(b"ERR unknown command");
            compose_rsp(wbuf, rsp)?;
        }
    }

    Ok(false)
}

/// Fill `rsp` for an engine error and pick the protocol status kind.
fn error_rsp(rsp: &mut Response, err: CacheError) -> ResponseType {
    rsp.reset();
    match err {
        CacheError::OutOfMemory => {
            rsp.vstr.extend_from_slice(b"out of memory");
            ResponseType::ServerError
        }
        other => {
            rsp.vstr.extend_from_slice(other.to_string().as_bytes());
            ResponseType::ClientError
        }
    }
}

fn resp_error(rsp: &mut Response, err: CacheError) -> ResponseType {
    let rtype = match err {
        CacheError::OutOfMemory => ResponseType::ServerError,
        _ => ResponseType::ClientError,
    };
    rsp.vstr.extend_from_slice(b"ERR ");
    rsp.vstr.extend_from_slice(err.to_string().as_bytes());
    rtype
}

/// Compose a plain status reply unless the request asked for silence.
fn reply_status(
    rsp: &mut Response,
    rtype: ResponseType,
    noreply: bool,
    wbuf: &mut Buffer,
) -> Result<(), ComposeError> {
    if noreply {
        return Ok(());
    }
    // error_rsp may have pre-filled the message
    if !matches!(
        rtype,
        ResponseType::ClientError | ResponseType::ServerError
    ) {
        rsp.reset();
    }
    rsp.rtype = rtype;
    protocol_memcache::compose_rsp(wbuf, rsp)?;
    Ok(())
}
