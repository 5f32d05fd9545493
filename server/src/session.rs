//! Per-connection session: read, parse, execute, compose, write.
//!
//! A session owns a buffer pair and a pooled request/response carrier.
//! Reads are blocking; the parse loop drains every complete pipelined
//! request in the read buffer before reading again, and a short parse
//! leaves the partial request in place until more bytes arrive.

use std::io::{self, Read, Write};
use std::sync::Arc;

use buffer::Buffer;
use cache_slab::{SlabCache, time};
use parking_lot::Mutex;
use protocol_common::{ParseError, ReqState, Request, Response, ResponseType};
use tracing::debug;

use crate::config::Protocol;
use crate::execute::execute;
use crate::metrics::{REQUEST_PARSE, REQUEST_PARSE_EX};

/// Drive one connection until EOF, QUIT, or a fatal protocol error.
pub fn run<S: Read + Write>(
    stream: &mut S,
    protocol: Protocol,
    engine: &Arc<Mutex<SlabCache>>,
    req: &mut Request,
    rsp: &mut Response,
    buf_init_size: usize,
    dbuf_max_power: u8,
) -> io::Result<()> {
    let mut rbuf = Buffer::new(buf_init_size, dbuf_max_power);
    let mut wbuf = Buffer::new(buf_init_size, dbuf_max_power);

    loop {
        let n = rbuf.read_from(stream)?;
        if n == 0 {
            debug!("client closed connection");
            return Ok(());
        }
        time::update();

        loop {
            let parsed = match protocol {
                Protocol::Memcache => protocol_memcache::parse_req(req, &mut rbuf),
                Protocol::Resp => protocol_resp::parse_req(req, &mut rbuf),
            };

            match parsed {
                Ok(()) => {
                    REQUEST_PARSE.increment();
                    let close = {
                        let mut cache = engine.lock();
                        execute(protocol, req, rsp, &mut cache, &mut wbuf)
                    };
                    req.reset();
                    rsp.reset();

                    match close {
                        Ok(close) => {
                            flush(stream, &mut wbuf)?;
                            if close {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            // response did not fit under the buffer cap
                            debug!(error = %e, "compose failed, closing");
                            wbuf.reset();
                            write_fatal(stream, protocol, rsp, b"out of memory", true)?;
                            return Ok(());
                        }
                    }
                }
                Err(ParseError::Unfin) => break,
                Err(e) => {
                    REQUEST_PARSE_EX.increment();
                    debug!(error = %e, "parse error, closing");
                    flush(stream, &mut wbuf)?;
                    let msg = e.to_string();
                    write_fatal(stream, protocol, rsp, msg.as_bytes(), false)?;
                    return Ok(());
                }
            }
        }
    }
}

/// Write everything queued in `wbuf`.
fn flush<S: Write>(stream: &mut S, wbuf: &mut Buffer) -> io::Result<()> {
    while !wbuf.is_empty() {
        if wbuf.write_to(stream)? == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
        }
    }
    wbuf.shrink();
    Ok(())
}

/// Compose a final error line for a connection about to close.
fn write_fatal<S: Write>(
    stream: &mut S,
    protocol: Protocol,
    rsp: &mut Response,
    msg: &[u8],
    server_error: bool,
) -> io::Result<()> {
    let mut out = Buffer::new(1024, 2);
    rsp.reset();
    rsp.rtype = if server_error {
        ResponseType::ServerError
    } else {
        ResponseType::ClientError
    };
    match protocol {
        Protocol::Memcache => {
            rsp.vstr.extend_from_slice(msg);
            let _ = protocol_memcache::compose_rsp(&mut out, rsp);
        }
        Protocol::Resp => {
            rsp.vstr.extend_from_slice(b"ERR ");
            rsp.vstr.extend_from_slice(msg);
            let _ = protocol_resp::compose_rsp(&mut out, rsp);
        }
    }
    rsp.reset();
    flush(stream, &mut out)
}

/// Reset a carrier abandoned mid-parse before returning it to its pool.
pub fn recycle(req: &mut Request, rsp: &mut Response) {
    if req.rstate != ReqState::Created {
        debug!("discarding partially parsed request");
    }
    req.reset();
    rsp.reset();
}
