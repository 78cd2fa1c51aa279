use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use log::{debug, error, warn};

use crate::engines::KvsEngine;
use crate::protocol::{read_message, Request, Response};
use crate::server::ServerContext;
use crate::store::Store;
use crate::{KvError, Result};

/// An accepted connection waiting in the queue for a worker.
#[derive(Debug)]
pub struct PendingConnection {
    /// The client socket.
    pub stream: TcpStream,
    /// When the acceptor took the connection off the listener.
    pub accepted_at: Instant,
}

impl PendingConnection {
    /// Stamps a freshly accepted stream with the current time.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            accepted_at: Instant::now(),
        }
    }
}

/// A fixed set of worker threads draining the connection queue.
///
/// Workers live until the queue is closed and empty. A panic while serving
/// one connection is caught and the worker moves on to the next one.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    // Every worker holds a sender; disconnection means all of them returned.
    done: Receiver<()>,
}

impl WorkerPool {
    /// Starts `config.worker_count` workers on the given context.
    ///
    /// # Errors
    ///
    /// Returns an error if any thread fails to spawn. The queue is closed first
    /// so workers that did start exit.
    pub fn start<E: KvsEngine>(ctx: &Arc<ServerContext<E>>) -> Result<Self> {
        let count = ctx.config().worker_count;
        let (done_tx, done) = channel::bounded::<()>(0);
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let worker_ctx = Arc::clone(ctx);
            let done_tx = done_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("kv-worker-{id}"))
                .spawn(move || {
                    let _done_tx = done_tx;
                    run_worker(id, &worker_ctx);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to spawn worker {id}: {e}");
                    ctx.queue().close();
                    return Err(KvError::Io(e));
                }
            }
        }

        debug!("Started {} workers", handles.len());
        Ok(WorkerPool { handles, done })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Waits until every worker has returned or `deadline` passes.
    ///
    /// Returns `true` if all workers finished and were joined. On timeout the
    /// remaining workers are detached and `false` is returned.
    pub fn wait(self, deadline: Instant) -> bool {
        loop {
            match self.done.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
        for handle in self.handles {
            if handle.join().is_err() {
                error!("Worker thread terminated by a panic");
            }
        }
        true
    }

    /// Lets the workers run on without waiting for them.
    pub fn detach(self) {
        debug!("Detaching {} workers", self.handles.len());
    }
}

fn run_worker<E: KvsEngine>(id: usize, ctx: &ServerContext<E>) {
    debug!("Worker {id} started");
    while let Some(conn) = ctx.queue().dequeue() {
        let dequeued_at = Instant::now();
        let waiting = dequeued_at.saturating_duration_since(conn.accepted_at);

        let served = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            serve_connection(ctx, conn.stream)
        }));

        match served {
            Ok(Ok(true)) => ctx.stats().record(waiting, dequeued_at.elapsed()),
            Ok(Ok(false)) => debug!("Worker {id}: peer closed without sending a request"),
            Ok(Err(KvError::Io(e)))
                if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                ) =>
            {
                debug!("Worker {id}: client went away: {e}");
            }
            Ok(Err(e)) => warn!("Worker {id}: error serving connection: {e}"),
            Err(_) => error!("Worker {id}: panicked while serving a connection, continuing"),
        }
    }
    debug!("Worker {id}: queue closed, shutting down");
}

/// Serves the single request carried by `stream`, then closes it.
///
/// Returns `Ok(false)` if the peer closed without sending anything.
fn serve_connection<E: KvsEngine>(ctx: &ServerContext<E>, stream: TcpStream) -> Result<bool> {
    let config = ctx.config();
    let limits = config.limits();
    stream.set_read_timeout(config.read_timeout())?;
    stream.set_write_timeout(config.write_timeout())?;
    let peer_addr = peer_label(stream.peer_addr().ok());

    let mut reader = BufReader::new(&stream);
    let Some(message) = read_message(&mut reader, &limits)? else {
        return Ok(false);
    };

    let response = match Request::parse(&message, &limits) {
        Ok(request) => {
            debug!("Received request from {peer_addr}: {request}");
            execute(ctx.store(), request)
        }
        Err(e) => {
            debug!("Rejected request from {peer_addr}: {e}");
            Response::FormatError
        }
    };

    let mut writer = BufWriter::new(&stream);
    response.write_to(&mut writer)?;
    debug!("Response sent to {peer_addr}: {response}");
    Ok(true)
}

/// Runs a parsed request against the store and builds the reply.
pub fn execute<E: KvsEngine>(store: &Store<E>, request: Request) -> Response {
    match request {
        Request::Get { key } => match store.get(key.as_str()) {
            Ok(Some(value)) => Response::GetOk(value),
            Ok(None) => Response::GetError,
            Err(e) => {
                warn!("GET {key} failed: {e}");
                Response::GetError
            }
        },
        Request::Put { key, value } => match store.put(key.as_str(), value.as_str()) {
            Ok(()) => Response::PutOk,
            Err(e) => {
                warn!("PUT {key} failed: {e}");
                Response::PutError
            }
        },
    }
}

fn peer_label(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "unknown".to_owned(), |a| a.to_string())
}
