//! TCP front end.
//!
//! The accept loop hands each connection to its own thread; the engine
//! sits behind a coarse mutex, and request/response carriers come from
//! shared fixed-capacity pools. Pool exhaustion answers `SERVER_ERROR`
//! and closes the connection instead of allocating past the bound.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use cache_slab::SlabCache;
use parking_lot::Mutex;
use protocol_common::{Pool, Request, Response};
use tracing::{error, info, warn};

use crate::config::{Config, Protocol};
use crate::metrics::{CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE};
use crate::session;

/// Shared carrier pools, sized by config.
struct Pools {
    requests: Pool<Request>,
    responses: Pool<Response>,
}

/// The cache server: engine, pools, and a bound listener.
pub struct Server {
    listener: TcpListener,
    protocol: Protocol,
    engine: Arc<Mutex<SlabCache>>,
    pools: Arc<Mutex<Pools>>,
    buf_init_size: usize,
    dbuf_max_power: u8,
}

impl Server {
    /// Build the engine and bind the listener.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let slab_config = config.slab.to_slab_config();
        let engine = SlabCache::new(&slab_config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let listener = TcpListener::bind(config.listener.address)?;
        info!(
            address = %listener.local_addr()?,
            protocol = ?config.listener.protocol,
            maxbytes = slab_config.maxbytes,
            "listening"
        );

        Ok(Self {
            listener,
            protocol: config.listener.protocol,
            engine: Arc::new(Mutex::new(engine)),
            pools: Arc::new(Mutex::new(Pools {
                requests: Pool::new(config.pools.request_poolsize),
                responses: Pool::new(config.pools.buf_sock_poolsize),
            })),
            buf_init_size: config.buffer.buf_init_size,
            dbuf_max_power: config.buffer.dbuf_max_power,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub fn run(self) -> io::Result<()> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            CONNECTIONS_ACCEPTED.increment();

            let protocol = self.protocol;
            let engine = Arc::clone(&self.engine);
            let pools = Arc::clone(&self.pools);
            let buf_init_size = self.buf_init_size;
            let dbuf_max_power = self.dbuf_max_power;

            thread::spawn(move || {
                CONNECTIONS_ACTIVE.increment();
                serve(stream, protocol, engine, pools, buf_init_size, dbuf_max_power);
                CONNECTIONS_ACTIVE.decrement();
            });
        }
        Ok(())
    }
}

fn serve(
    mut stream: TcpStream,
    protocol: Protocol,
    engine: Arc<Mutex<SlabCache>>,
    pools: Arc<Mutex<Pools>>,
    buf_init_size: usize,
    dbuf_max_power: u8,
) {
    let taken = {
        let mut pools = pools.lock();
        match (pools.requests.take(), pools.responses.take()) {
            (Some(req), Some(rsp)) => Some((req, rsp)),
            (req, rsp) => {
                // return whichever half we got
                if let Some(req) = req {
                    pools.requests.put(req);
                }
                if let Some(rsp) = rsp {
                    pools.responses.put(rsp);
                }
                None
            }
        }
    };

    let Some((mut req, mut rsp)) = taken else {
        warn!("carrier pools exhausted, refusing connection");
        let line: &[u8] = match protocol {
            Protocol::Memcache => b"SERVER_ERROR out of memory\r\n",
            Protocol::Resp => b"-ERR out of memory\r\n",
        };
        let _ = stream.write_all(line);
        return;
    };

    if let Err(e) = session::run(
        &mut stream,
        protocol,
        &engine,
        &mut req,
        &mut rsp,
        buf_init_size,
        dbuf_max_power,
    ) {
        warn!(error = %e, "connection error");
    }

    session::recycle(&mut req, &mut rsp);
    let mut pools = pools.lock();
    pools.requests.put(req);
    pools.responses.put(rsp);
}
