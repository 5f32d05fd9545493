//! Memcached ASCII wire protocol.
//!
//! Requests are CRLF-terminated header lines, optionally followed by a raw
//! value block of exactly `bytes` octets plus CRLF:
//!
//! ```text
//! get <key>+ CRLF
//! gets <key>+ CRLF
//! set <key> <flag> <exptime> <bytes> [noreply] CRLF <data[bytes]> CRLF
//! add|replace|append|prepend ... (same shape)
//! cas <key> <flag> <exptime> <bytes> <cas> [noreply] CRLF <data> CRLF
//! incr|decr <key> <delta> [noreply] CRLF
//! delete <key> [noreply] CRLF
//! flush_all [delay] CRLF
//! quit CRLF
//! ```
//!
//! Parsing is incremental. The header line is parsed as a unit: on a short
//! read [`parse_req`] returns [`ParseError::Unfin`] without consuming and
//! re-reads the line when more bytes arrive. Once a storage header is
//! complete the parser consumes it and moves to the `VAL` state, so the
//! second pass reads exactly `bytes` octets without rescanning the header.
//!
//! The response side is symmetric: [`compose_rsp`] renders status lines and
//! `VALUE` blocks, and [`parse_rsp`] (client side) recognizes them.

mod compose;
mod parse;

pub use compose::{compose_req, compose_rsp};
pub use parse::{parse_req, parse_rsp};

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
    fn test_get_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Get;
        req.keys.push(b"foo".to_vec());
        req.keys.push(b"bar".to_vec());

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();
        assert_eq!(buf.as_slice(), b"get foo bar\r\n");

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, RequestType::Get);
        assert_eq!(parsed.keys, vec![b"foo".to_vec(), b"bar".to_vec()]);
        assert_eq!(parsed.rstate, ReqState::Parsed);
    }

    #[test]
    fn test_set_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Set;
        req.keys.push(b"foo".to_vec());
        req.flag = 123;
        req.expiry = 3600;
        req.vstr = b"XYZ".to_vec();
        req.vlen = 3;

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();
        assert_eq!(buf.as_slice(), b"set foo 123 3600 3\r\nXYZ\r\n");

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, RequestType::Set);
        assert_eq!(parsed.key(), b"foo");
        assert_eq!(parsed.flag, 123);
        assert_eq!(parsed.expiry, 3600);
        assert_eq!(parsed.vlen, 3);
        assert_eq!(parsed.vstr, b"XYZ");
        assert!(!parsed.noreply);
    }

    #[test]
    fn test_cas_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Cas;
        req.keys.push(b"k".to_vec());
        req.vcas = 42;
        req.vstr = b"v".to_vec();
        req.vlen = 1;
        req.noreply = true;

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();
        assert_eq!(buf.as_slice(), b"cas k 0 0 1 42 noreply\r\nv\r\n");

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, RequestType::Cas);
        assert_eq!(parsed.vcas, 42);
        assert!(parsed.noreply);
        assert_eq!(parsed.vstr, b"v");
    }

    #[test]
    fn test_incr_round_trip() {
        let mut req = Request::new();
        req.rtype = RequestType::Incr;
        req.keys.push(b"counter".to_vec());
        req.delta = 909;

        let mut buf = Buffer::new(64, 2);
        compose_req(&mut buf, &req).unwrap();
        assert_eq!(buf.as_slice(), b"incr counter 909\r\n");

        let mut parsed = Request::new();
        parse_req(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.delta, 909);
    }

    #[test]
    fn test_split_header_and_value() {
        let mut buf = buf_with(b"set foo 0 0 5");
        let mut req = Request::new();

        // header line incomplete
        assert_eq!(parse_req(&mut req, &mut buf), Err(ParseError::Unfin));
        assert_eq!(buf.rsize(), 13);

        // header completes, value still missing
        buf.write_slice(b"\r\nhel").unwrap();
        assert_eq!(parse_req(&mut req, &mut buf), Err(ParseError::Unfin));

        // value completes
        buf.write_slice(b"lo\r\n").unwrap();
        parse_req(&mut req, &mut buf).unwrap();
        assert_eq!(req.vstr, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_byte_at_a_time_equals_one_shot() {
        let wire = b"cas foo 7 100 5 99 noreply\r\nhello\r\n";

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
    fn test_bad_value_terminator() {
        let mut buf = buf_with(b"set foo 0 0 3\r\nXYZ..");
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_digit_flag() {
        let mut buf = buf_with(b"set foo x 0 3\r\n");
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_store_fields() {
        let mut buf = buf_with(b"set foo 0\r\n");
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Other(_))
        ));
    }

    #[test]
    fn test_unknown_verb() {
        let mut buf = buf_with(b"frobnicate foo\r\n");
        let mut req = Request::new();
        assert!(matches!(
            parse_req(&mut req, &mut buf),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_flush_all_with_delay() {
        let mut buf = buf_with(b"flush_all 10\r\n");
        let mut req = Request::new();
        parse_req(&mut req, &mut buf).unwrap();
        assert_eq!(req.rtype, RequestType::Flush);
        assert_eq!(req.expiry, 10);

        let mut buf = buf_with(b"flush_all noreply\r\n");
        let mut req = Request::new();
        parse_req(&mut req, &mut buf).unwrap();
        assert!(req.noreply);
        assert_eq!(req.expiry, 0);
    }

    #[test]
    fn test_quit_with_trailing_space() {
        let mut buf = buf_with(b"quit \r\n");
        let mut req = Request::new();
        parse_req(&mut req, &mut buf).unwrap();
        assert_eq!(req.rtype, RequestType::Quit);
    }

    #[test]
    fn test_pipelined_requests() {
        let mut buf = buf_with(b"get a\r\nget b\r\n");

        let mut first = Request::new();
        parse_req(&mut first, &mut buf).unwrap();
        assert_eq!(first.keys, vec![b"a".to_vec()]);

        let mut second = Request::new();
        parse_req(&mut second, &mut buf).unwrap();
        assert_eq!(second.keys, vec![b"b".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_compose_rsp_status_lines() {
        let cases: &[(ResponseType, &[u8])] = &[
            (ResponseType::Ok, b"OK\r\n"),
            (ResponseType::End, b"END\r\n"),
            (ResponseType::Stored, b"STORED\r\n"),
            (ResponseType::NotStored, b"NOT_STORED\r\n"),
            (ResponseType::Exists, b"EXISTS\r\n"),
            (ResponseType::Deleted, b"DELETED\r\n"),
            (ResponseType::NotFound, b"NOT_FOUND\r\n"),
        ];
        for (rtype, wire) in cases {
            let mut rsp = Response::new();
            rsp.rtype = *rtype;
            let mut buf = Buffer::new(64, 2);
            compose_rsp(&mut buf, &rsp).unwrap();
            assert_eq!(buf.as_slice(), *wire);
        }
    }

    #[test]
    fn test_value_response_round_trip() {
        let mut rsp = Response::new();
        rsp.rtype = ResponseType::Value;
        rsp.key = b"foo".to_vec();
        rsp.flag = 9;
        rsp.vstr = b"hello".to_vec();
        rsp.vlen = 5;
        rsp.cas = true;
        rsp.vcas = 77;

        let mut buf = Buffer::new(128, 2);
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b"VALUE foo 9 5 77\r\nhello\r\n");

        let mut parsed = Response::new();
        parse_rsp(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, ResponseType::Value);
        assert_eq!(parsed.key, b"foo");
        assert_eq!(parsed.flag, 9);
        assert_eq!(parsed.vcas, 77);
        assert_eq!(parsed.vstr, b"hello");
    }

    #[test]
    fn test_error_response_round_trip() {
        let mut rsp = Response::new();
        rsp.rtype = ResponseType::ClientError;
        rsp.vstr = b"object too large for cache".to_vec();

        let mut buf = Buffer::new(128, 2);
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b"CLIENT_ERROR object too large for cache\r\n");

        let mut parsed = Response::new();
        parse_rsp(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, ResponseType::ClientError);
        assert_eq!(parsed.vstr, b"object too large for cache");
    }

    #[test]
    fn test_numeric_response_round_trip() {
        let mut rsp = Response::new();
        rsp.rtype = ResponseType::Numeric;
        rsp.num = true;
        rsp.vint = 910;

        let mut buf = Buffer::new(64, 2);
        compose_rsp(&mut buf, &rsp).unwrap();
        assert_eq!(buf.as_slice(), b"910\r\n");

        let mut parsed = Response::new();
        parse_rsp(&mut parsed, &mut buf).unwrap();
        assert_eq!(parsed.rtype, ResponseType::Numeric);
        assert_eq!(parsed.vint, 910);
    }
}
