use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::{ServerConfig, ShutdownMode};
use crate::engines::KvsEngine;
use crate::queue::{BoundedQueue, Closed};
use crate::stats::{ServerStats, StatsSnapshot};
use crate::store::Store;
use crate::worker::{PendingConnection, WorkerPool};
use crate::Result;

/// Everything the acceptor, the workers and the shutdown path share.
pub struct ServerContext<E: KvsEngine> {
    config: ServerConfig,
    queue: BoundedQueue<PendingConnection>,
    store: Store<E>,
    stats: ServerStats,
    admitted: AtomicU64,
}

impl<E: KvsEngine> ServerContext<E> {
    fn new(config: ServerConfig, engine: E) -> Result<Self> {
        Ok(Self {
            queue: BoundedQueue::new(config.queue_capacity)?,
            store: Store::new(engine, config.read_policy),
            stats: ServerStats::new(),
            admitted: AtomicU64::new(0),
            config,
        })
    }

    /// Configuration the server was started with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Queue of accepted connections.
    pub fn queue(&self) -> &BoundedQueue<PendingConnection> {
        &self.queue
    }

    /// Store shared by the workers.
    pub fn store(&self) -> &Store<E> {
        &self.store
    }

    /// Latency statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Number of connections the acceptor has placed in the queue.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Acquire)
    }
}

/// Requests termination of a running [`KvsServer`].
///
/// Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    wake_addr: SocketAddr,
    close_queue: Arc<dyn Fn() + Send + Sync>,
}

impl ShutdownHandle {
    /// Stops admission: closes the queue and wakes the acceptor.
    ///
    /// Only the first call has an effect.
    pub fn shutdown(&self) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        (self.close_queue)();
        // A blocking accept only returns on a connection, so hand it one.
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, Duration::from_secs(1)) {
            debug!("Could not wake the acceptor at {}: {}", self.wake_addr, e);
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// The multi-threaded key-value server.
///
/// One acceptor thread (the caller of [`run`](Self::run)) feeds a bounded
/// queue that a fixed pool of workers drains. When the queue is full the
/// acceptor stops accepting until a worker frees a slot.
pub struct KvsServer<E: KvsEngine> {
    ctx: Arc<ServerContext<E>>,
    listener: TcpListener,
    shutdown: ShutdownHandle,
}

impl<E: KvsEngine> KvsServer<E> {
    /// Validates `config`, binds the listener and wraps `engine`.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the address cannot be bound.
    pub fn bind(config: ServerConfig, engine: E) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.addr())?;
        let local_addr = listener.local_addr()?;
        let ctx = Arc::new(ServerContext::new(config, engine)?);

        let queue_ctx = Arc::clone(&ctx);
        let shutdown = ShutdownHandle {
            requested: Arc::new(AtomicBool::new(false)),
            wake_addr: wake_addr(local_addr),
            close_queue: Arc::new(move || queue_ctx.queue().close()),
        };

        Ok(Self {
            ctx,
            listener,
            shutdown,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle used to stop the server from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Shared server state.
    pub fn context(&self) -> &Arc<ServerContext<E>> {
        &self.ctx
    }

    /// Runs the server until [`ShutdownHandle::shutdown`] is called.
    ///
    /// Starts the workers, accepts on the calling thread, then performs the
    /// shutdown sequence and returns the final statistics.
    ///
    /// # Errors
    ///
    /// Fails before serving any traffic if the workers cannot be started.
    pub fn run(self) -> Result<StatsSnapshot> {
        let pool = WorkerPool::start(&self.ctx)?;
        info!(
            "Serving on {} with {} workers and {} queue slots",
            self.local_addr()?,
            pool.size(),
            self.ctx.queue().capacity()
        );

        self.accept_loop();
        let KvsServer { ctx, listener, .. } = self;
        drop(listener);
        Ok(shut_down(&ctx, pool))
    }

    fn accept_loop(&self) {
        for stream in self.listener.incoming() {
            if self.shutdown.is_requested() {
                break;
            }
            match stream {
                Ok(stream) => {
                    debug!(
                        "Accepted connection from {}",
                        stream
                            .peer_addr()
                            .map_or_else(|_| "unknown".to_owned(), |a| a.to_string())
                    );
                    if self.ctx.queue().is_full() {
                        debug!("Queue is full, waiting for a free slot");
                    }
                    if let Err(Closed(conn)) = self.ctx.queue().enqueue(PendingConnection::new(stream)) {
                        debug!("Queue closed, dropping connection accepted at {:?}", conn.accepted_at);
                        break;
                    }
                    self.ctx.admitted.fetch_add(1, Ordering::AcqRel);
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        debug!("Acceptor stopped");
    }
}

/// Stops the workers according to the configured [`ShutdownMode`], reports
/// statistics and closes the store.
fn shut_down<E: KvsEngine>(ctx: &ServerContext<E>, pool: WorkerPool) -> StatsSnapshot {
    ctx.queue().close();

    match ctx.config().shutdown_mode {
        ShutdownMode::Drain => {
            let timeout = ctx.config().drain_timeout();
            info!("Draining in-flight requests for up to {:?}", timeout);
            if pool.wait(Instant::now() + timeout) {
                info!("All workers finished");
            } else {
                let dropped = ctx.queue().drain();
                warn!(
                    "Drain timed out, closing {} queued connections and detaching busy workers",
                    dropped.len()
                );
            }
        }
        ShutdownMode::Immediate => {
            let dropped = ctx.queue().drain();
            info!("Closing {} queued connections", dropped.len());
            pool.detach();
        }
    }

    let snapshot = ctx.stats().snapshot();
    info!("Server statistics:\n{}", snapshot);

    if let Err(e) = ctx.store().close() {
        error!("Failed to close the store: {}", e);
    }
    snapshot
}

/// Loopback equivalent of a wildcard listen address.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port())
        }
        _ => local,
    }
}
