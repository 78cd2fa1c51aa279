use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::protocol::{FieldLimits, Request, Response};
use crate::{KvError, Result};

/// The client of a key-value server.
///
/// The server answers one request per connection, so every call opens a
/// fresh connection, sends one line and reads until the server closes.
#[derive(Debug, Clone)]
pub struct KvsClient {
    addr: SocketAddr,
    limits: FieldLimits,
    timeout: Option<Duration>,
}

impl KvsClient {
    /// Resolves `addr` and builds a client for it.
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            KvError::StringError("address did not resolve to any socket address".to_owned())
        })?;
        Ok(Self {
            addr,
            limits: FieldLimits::default(),
            timeout: None,
        })
    }

    /// Sets the field limits used to truncate outgoing keys and values.
    pub fn with_limits(mut self, limits: FieldLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets a read/write timeout for every connection.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Field limits applied to outgoing keys and values.
    pub fn limits(&self) -> FieldLimits {
        self.limits
    }

    /// Sends `message` verbatim and returns the server's reply line.
    pub fn send_raw(&self, message: &str) -> Result<String> {
        let mut stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;

        stream.write_all(message.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;

        let mut reply = String::new();
        stream.read_to_string(&mut reply)?;
        Ok(reply.trim_end_matches(['\r', '\n']).to_owned())
    }

    /// Sends a request and parses the reply.
    pub fn send(&self, request: &Request) -> Result<Response> {
        Response::parse(&self.send_raw(&request.to_string())?)
    }

    /// Stores `value` under `key`.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        match self.send(&Request::put(key, value, &self.limits))? {
            Response::PutOk => Ok(()),
            Response::PutError => Err(KvError::StringError(format!("server failed to store {key}"))),
            other => Err(KvError::UnexpectedResponse(other.to_string())),
        }
    }

    /// Gets the value of `key`; `None` if the server answered `GET ERROR`.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.send(&Request::get(key, &self.limits))? {
            Response::GetOk(value) => Ok(Some(value)),
            Response::GetError => Ok(None),
            other => Err(KvError::UnexpectedResponse(other.to_string())),
        }
    }
}
