//! Socket-level smoke tests: a real listener, a real client connection.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use server::{Config, Server};

fn start(protocol: &str) -> std::net::SocketAddr {
    let raw = format!(
        r#"
        [listener]
        protocol = "{}"
        address = "127.0.0.1:0"

        [slab]
        slab_size = "64KB"
        slab_maxbytes = "4MB"
        "#,
        protocol
    );
    let config: Config = toml::from_str(&raw).unwrap();
    let server = Server::bind(&config).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || {
        let _ = server.run();
    });
    addr
}

fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    loop {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before {:?}", needle);
        out.extend_from_slice(&chunk[..n]);
        if out.ends_with(needle) {
            return out;
        }
    }
}

#[test]
fn memcache_set_get_delete_over_tcp() {
    let addr = start("memcache");
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(b"set foo 7 0 3\r\nbar\r\n").unwrap();
    assert_eq!(read_until(&mut stream, b"\r\n"), b"STORED\r\n");

    stream.write_all(b"get foo\r\n").unwrap();
    assert_eq!(
        read_until(&mut stream, b"END\r\n"),
        b"VALUE foo 7 3\r\nbar\r\nEND\r\n"
    );

    stream.write_all(b"delete foo\r\n").unwrap();
    assert_eq!(read_until(&mut stream, b"\r\n"), b"DELETED\r\n");

    stream.write_all(b"get foo\r\n").unwrap();
    assert_eq!(read_until(&mut stream, b"END\r\n"), b"END\r\n");

    stream.write_all(b"quit\r\n").unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn memcache_split_writes_resume() {
    let addr = start("memcache");
    let mut stream = TcpStream::connect(addr).unwrap();

    // header and body arrive in separate packets
    stream.write_all(b"set split 0 0 5\r\nhe").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"llo\r\n").unwrap();
    assert_eq!(read_until(&mut stream, b"\r\n"), b"STORED\r\n");

    stream.write_all(b"get split\r\n").unwrap();
    assert_eq!(
        read_until(&mut stream, b"END\r\n"),
        b"VALUE split 0 5\r\nhello\r\nEND\r\n"
    );
}

#[test]
fn memcache_pipelined_requests() {
    let addr = start("memcache");
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"set a 0 0 1\r\nx\r\nset b 0 0 1\r\ny\r\nget a b\r\n")
        .unwrap();
    let out = read_until(&mut stream, b"END\r\n");
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("STORED\r\nSTORED\r\n"));
    assert!(text.contains("VALUE a 0 1\r\nx\r\n"));
    assert!(text.contains("VALUE b 0 1\r\ny\r\n"));
}

#[test]
fn resp_set_get_over_tcp() {
    let addr = start("resp");
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .unwrap();
    assert_eq!(read_until(&mut stream, b"\r\n"), b"+OK\r\n");

    stream.write_all(b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n").unwrap();
    assert_eq!(read_until(&mut stream, b"bar\r\n"), b"$3\r\nbar\r\n");

    stream
        .write_all(b"*3\r\n$6\r\nincrby\r\n$3\r\nctr\r\n$3\r\n909\r\n")
        .unwrap();
    // missing key answers nil
    assert_eq!(read_until(&mut stream, b"\r\n"), b"$-1\r\n");
}
