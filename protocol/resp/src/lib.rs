//! RESP-style wire protocol.
//!
//! Requests arrive as an array of bulk strings:
//!
//! ```text
//! Array := "*" uint CRLF Bulk{N}
//! Bulk  := "$" uint CRLF <bytes[uint]> CRLF
//! ```
//!
//! The first bulk is the verb. Parsing is incremental: on short input
//! [`parse_req`] returns [`ParseError::Unfin`] without consuming anything
//! from the current parse state, and the caller retries once more bytes
//! arrive. For `set`, the header (through the key) and the value bulk are
//! separate parse states so a large value streaming in does not force the
//! header to be re-parsed.
//!
//! Responses use the standard RESP forms: simple string, error, integer,
//! bulk (with `$-1` for nil), and array.
//!
//! There is no response parser. This flavor is served, never spoken
//! client-side, and the reference implementation never parsed responses
//! either.

mod compose;
mod parse;

pub use compose::{compose_array_header, compose_req, compose_rsp};
pub use parse::parse_req;

pub use protocol_common::{ParseError, ParseResult};

#[cfg(test)]
mod tests {
    use super::*;
    use buffer::Buffer;
    use protocol_common::{ReqState, Request, RequestType, Response, ResponseType};

    fn buf_with(bytes: &[u8]) -> Buffer {
        let mut buf = Buffer::new(1024, 4);
        buf.write_slice(bytes).unwrap();
        buf
    }

    #[test]
    fn test_quit_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Quit;

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();
        assert_eq!(buf.as_slice(), b"*1\r\n$4\r\nquit\r\n");

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, RequestType::Quit);
        assert_eq!(parsed.rstate, ReqState::Parsed);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_get_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Get;
        req.keys.push(b"foo".to_vec());

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();
        assert_eq!(buf.as_slice(), b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n");

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, RequestType::Get);
        assert_eq!(parsed.keys, vec![b"foo".to_vec()]);
    }

    #[test]
    fn test_incrby_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Incr;
        req.keys.push(b"foo".to_vec());
        req.delta = 909;

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();
        assert_eq!(buf.as_slice(), b"*3\r\n$6\r\nincrby\r\n$3\r\nfoo\r\n$3\r\n909\r\n");

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, RequestType::Incr);
        assert_eq!(parsed.delta, 909);
        assert_eq!(parsed.keys, vec![b"foo".to_vec()]);
    }

    #[test]
    fn test_set_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Set;
        req.keys.push(b"k".to_vec());
        req.vstr = b"some value".to_vec();

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, RequestType::Set);
        assert_eq!(parsed.key(), b"k");
        assert_eq!(parsed.vstr, b"some value");
        assert_eq!(parsed.vlen, 10);
    }

    #[test]
    fn test_partial_then_complete() {
        // S6: header split mid-bulk.
        let mut buf = buf_with(b"*2\r\n$3\r\nget");
        let mut req = Request::new();

        assert_eq!(parse_req(&mut req, &mut buf), Err(ParseError::Unfin));
        assert_eq!(buf.rsize(), 11); // rpos unchanged

        buf.write_slice(b"\r\n$3\r\nfoo\r\n").unwrap();
        parse_req(&mut req, &mut buf).unwrap();
        assert_eq!(req.rtype, RequestType::Get);
        assert_eq!(req.keys, vec![b"foo".to_vec()]);
    }

    #[test]
    fn test_byte_at_a_time_equals_one_shot() {
        let wire = b"*3\r\n$6\r\nincrby\r\n$3\r\nfoo\r\n$3\r\n909\r\n";

        let mut oneshot = Request::new();
        let mut buf = buf_with(wire);
        parse_req(&mut oneshot, &mut buf).unwrap();

        let mut incremental = Request::new();
        let mut buf = Buffer::new(1024, 4);
        for (i, byte) in wire.iter().enumerate() {
            buf.write_slice(&[*byte]).unwrap();
            let r = parse_req(&mut incremental, &mut buf);
            if i < wire.len() - 1 {
                assert_eq!(r, Err(ParseError::Unfin), "byte {}", i);
            } else {
                r.unwrap();
            }
        }
        assert_eq!(incremental, oneshot);
    }

    #[test]
    fn test_set_byte_at_a_time() {
        let wire = b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$5\r\nhello\r\n";
        let mut req = Request::new();
        let mut buf = Buffer::new(1024, 4);
        for (i, byte) in wire.iter().enumerate() {
            buf.write_slice(&[*byte]).unwrap();
            let r = parse_req(&mut req, &mut buf);
            if i < wire.len() - 1 {
                assert_eq!(r, Err(ParseError::Unfin), "byte {}", i);
            } else {
                r.unwrap();
            }
        }
        assert_eq!(req.vstr, b"hello");
    }

    #[test]
    fn test_mget_keys() {
        let mut buf = buf_with(b"*3\r\n$4\r\nmget\r\n$1\r\na\r\n$1\r\nb\r\n");
        let mut req = Request::new();
        parse_req(&mut req, &mut buf).unwrap();
        assert_eq!(req.rtype, RequestType::Mget);
        assert_eq!(req.keys.len(), 2);
    }

    #[test]
    fn test_unknown_verb_invalid() {
        let mut buf = buf_with(b"*1\r\n$4\r\nnope\r\n");
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_digit_delta_invalid() {
        let mut buf = buf_with(b"*3\r\n$6\r\nincrby\r\n$3\r\nfoo\r\n$3\r\n9a9\r\n");
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_delta_overflow_invalid() {
        // 21 nines cannot fit a u64.
        let mut buf = buf_with(b"*3\r\n$6\r\nincrby\r\n$3\r\nfoo\r\n$21\r\n999999999999999999999\r\n");
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_too_many_keys_other() {
        let mut wire = b"*52\r\n$3\r\nget\r\n".to_vec();
        for _ in 0..51 {
            wire.extend_from_slice(b"$1\r\nk\r\n");
        }
        let mut buf = buf_with(&wire);
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Other(_))
        ));
    }

    #[test]
    fn test_compose_rsp_forms() {
        let mut buf = Buffer::new(64, 2);
        let mut rsp = Response::new();

        rsp.rtype = ResponseType::Ok;
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b"+OK\r\n");
        buf.reset();

        rsp.reset();
        rsp.rtype = ResponseType::Value;
        rsp.vstr = b"XYZ".to_vec();
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b"$3\r\nXYZ\r\n");
        buf.reset();

        rsp.reset();
        rsp.rtype = ResponseType::NotFound;
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b"$-1\r\n");
        buf.reset();

        rsp.reset();
        rsp.rtype = ResponseType::Numeric;
        rsp.num = true;
        rsp.vint = 910;
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b":910\r\n");
        buf.reset();

        rsp.reset();
        rsp.rtype = ResponseType::ClientError;
        rsp.vstr = b"ERR value is not an integer".to_vec();
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b"-ERR value is not an integer\r\n");
    }

    #[test]
    fn test_compose_array_header() {
        let mut buf = Buffer::new(64, 2);
        compose_array_header(&mut buf, 3).unwrap();
        assert_eq!(buf.as_slice(), b"*3\r\n");
    }

    #[test]
    fn test_compose_grow_capped() {
        let mut rsp = Response::new();
        rsp.rtype = ResponseType::Value;
        rsp.vstr = vec![b'v'; 4096];

        let mut buf = Buffer::new(64, 2); // cap 256
        assert!(compose_rsp(&mut buf, &rsp).is_err());
    }
}
