//! The orchestrator: listener, readiness monitor, worker pools, and the
//! connection registry.
//!
//! ## pipeline
//!
//! Every connection moves through
//! `accept → wait-for-readable → read → parse+execute → write → requeue`,
//! with each stage executed by its own worker pool so no stage blocks
//! another. The registry (`fd → connection`) is the single owner of
//! connection state; the readiness and in-flight sets are derived views
//! recording which side of the pipeline a descriptor is on.
//!
//! ## readiness
//!
//! A dedicated thread drives a mio `Poll`. The arm policy is
//! rearm-on-each-iteration: before every wait, the current readiness set
//! is registered and afterwards deregistered wholesale. That costs O(R)
//! syscalls per iteration but needs no per-descriptor kernel state
//! across pipeline transitions. A mio `Waker` interrupts the wait when
//! the accept thread or a write worker adds a descriptor to the set.
//!
//! ## locks
//!
//! Hierarchy, acquired in this order and never the reverse:
//! registry → connection state → readiness set → in-flight set.
//! No lock is held across a blocking syscall.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Socket, Type};
use tracing::{debug, error, info, warn};

use cinder_store::PartitionedStore;

use crate::config::ServerConfig;
use crate::connection::{Connection, Phase};
use crate::jobs::ReadJob;
use crate::pool::WorkerPool;
use crate::sync;

/// Token reserved for the cross-thread waker; never a descriptor.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Capacity of the event buffer handed to the kernel wait.
const MAX_READY_EVENTS: usize = 64;

/// Readiness wait timeout. Short enough that the shutdown flag is
/// observed promptly.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Listen backlog for the server socket.
const LISTEN_BACKLOG: i32 = 128;

/// State shared between the orchestrator threads and pipeline jobs.
pub(crate) struct Shared {
    listener: TcpListener,
    local_addr: SocketAddr,
    pub(crate) store: PartitionedStore,
    /// Authoritative `fd → state` map.
    pub(crate) registry: Mutex<HashMap<RawFd, Arc<Mutex<Connection>>>>,
    /// Descriptors to arm with the kernel on the next iteration.
    pub(crate) readiness: Mutex<HashSet<RawFd>>,
    /// Descriptors currently owned by a pipeline stage.
    pub(crate) in_flight: Mutex<HashSet<RawFd>>,
    pub(crate) waker: Waker,
    shutdown: AtomicBool,
    pub(crate) read_pool: WorkerPool,
    pub(crate) execute_pool: WorkerPool,
    pub(crate) write_pool: WorkerPool,
}

impl Shared {
    /// Moves a descriptor from the in-flight set back into the readiness
    /// set and wakes the readiness thread. Used when a connection is
    /// recycled after a response, and when a partial frame needs more
    /// bytes before it can be parsed.
    pub(crate) fn requeue_for_readiness(&self, fd: RawFd) {
        sync::lock(&self.readiness).insert(fd);
        sync::lock(&self.in_flight).remove(&fd);
        if let Err(e) = self.waker.wake() {
            warn!("readiness wakeup failed: {e}");
        }
    }

    /// Terminal teardown: releases the stage's guard, removes the
    /// descriptor from the registry and every derived set, and shuts the
    /// socket down.
    pub(crate) fn close_and_cleanup(&self, fd: RawFd, guard: Option<MutexGuard<'_, Connection>>) {
        if let Some(mut guard) = guard {
            guard.phase = Phase::Closing;
            drop(guard);
        }

        let conn = sync::lock(&self.registry).remove(&fd);
        sync::lock(&self.readiness).remove(&fd);
        sync::lock(&self.in_flight).remove(&fd);

        if let Some(conn) = conn {
            let mut guard = sync::lock(&conn);
            guard.phase = Phase::Closing;
            guard.shutdown();
        }
        debug!(fd, "connection closed");
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Owns the orchestrator threads. Dropping shuts the server down.
pub struct Orchestrator {
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
    readiness_thread: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Binds the listener, creates the readiness facility and worker
    /// pools, and spawns the accept and readiness threads.
    pub fn start(config: &ServerConfig) -> io::Result<Orchestrator> {
        let addr = config
            .socket_addr()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        let shared = Arc::new(Shared {
            listener,
            local_addr,
            store: PartitionedStore::new(config.partitions),
            registry: Mutex::new(HashMap::new()),
            readiness: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashSet::new()),
            waker,
            shutdown: AtomicBool::new(false),
            read_pool: WorkerPool::new("read", config.workers)?,
            execute_pool: WorkerPool::new("execute", config.workers)?,
            write_pool: WorkerPool::new("write", config.workers)?,
        });

        let accept_shared = Arc::clone(&shared);
        let accept_thread = std::thread::Builder::new()
            .name("accept".into())
            .spawn(move || accept_loop(accept_shared))?;

        let readiness_shared = Arc::clone(&shared);
        let readiness_thread = std::thread::Builder::new()
            .name("readiness".into())
            .spawn(move || readiness_loop(readiness_shared, poll))?;

        info!(addr = %local_addr, partitions = config.partitions, workers = config.workers, "listening");

        Ok(Orchestrator {
            shared,
            accept_thread: Some(accept_thread),
            readiness_thread: Some(readiness_thread),
        })
    }

    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Blocks the calling thread until the server shuts down.
    pub fn wait(&mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }

    /// Stops accepting, drains the readiness thread, destroys the worker
    /// pools, and joins the orchestrator threads. In-flight connections
    /// finish their current stage. The listening socket closes last,
    /// when the orchestrator drops. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down");

        if let Err(e) = self.shared.waker.wake() {
            warn!("readiness wakeup failed during shutdown: {e}");
        }
        if let Some(handle) = self.readiness_thread.take() {
            let _ = handle.join();
        }

        self.shared.read_pool.destroy();
        self.shared.execute_pool.destroy();
        self.shared.write_pool.destroy();

        // the accept thread blocks in accept(); a loopback connection
        // makes it observe the shutdown flag
        let mut unblock = self.local_addr();
        if unblock.ip().is_unspecified() {
            unblock.set_ip(match unblock.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        let _ = TcpStream::connect(unblock);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Creates the listening socket with address and port reuse, bound and
/// listening in blocking mode.
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Blocking accept loop. Each new socket is set non-blocking, entered
/// into the registry, added to the readiness set, and the readiness
/// thread woken.
fn accept_loop(shared: Arc<Shared>) {
    loop {
        let (stream, peer) = match shared.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                if shared.is_shutting_down() {
                    break;
                }
                error!("accept failed: {e}");
                continue;
            }
        };

        if shared.is_shutting_down() {
            break;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, "could not set non-blocking, dropping connection: {e}");
            continue;
        }

        let fd = stream.as_raw_fd();
        let conn = Arc::new(Mutex::new(Connection::new(stream)));
        sync::lock(&shared.registry).insert(fd, Arc::clone(&conn));
        sync::lock(&conn).phase = Phase::WaitingForReadiness;
        sync::lock(&shared.readiness).insert(fd);

        debug!(fd, %peer, "accepted, waking readiness thread");
        if let Err(e) = shared.waker.wake() {
            warn!("readiness wakeup failed: {e}");
        }
    }
    debug!("accept thread exiting");
}

/// The readiness thread: arm, wait, disarm, dispatch.
fn readiness_loop(shared: Arc<Shared>, mut poll: Poll) {
    let mut events = Events::with_capacity(MAX_READY_EVENTS);

    while !shared.is_shutting_down() {
        // rearm-on-each-iteration: register the current readiness set
        let armed: Vec<RawFd> = sync::lock(&shared.readiness).iter().copied().collect();
        for &fd in &armed {
            if let Err(e) =
                poll.registry()
                    .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)
            {
                warn!(fd, "failed to arm descriptor: {e}");
            }
        }

        match poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => error!("readiness wait failed: {e}"),
        }

        for &fd in &armed {
            if let Err(e) = poll.registry().deregister(&mut SourceFd(&fd)) {
                warn!(fd, "failed to disarm descriptor: {e}");
            }
        }

        // any event on a descriptor counts as ready; hangups and errors
        // surface as a failing read in the read stage
        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let fd = event.token().0 as RawFd;
            if !sync::lock(&shared.readiness).remove(&fd) {
                continue;
            }
            sync::lock(&shared.in_flight).insert(fd);
            dispatch_read(&shared, fd);
        }
    }
    debug!("readiness thread exiting");
}

/// Hands a readable descriptor to the read pool.
fn dispatch_read(shared: &Arc<Shared>, fd: RawFd) {
    let conn = sync::lock(&shared.registry).get(&fd).cloned();
    let Some(conn) = conn else {
        sync::lock(&shared.in_flight).remove(&fd);
        return;
    };

    sync::lock(&conn).phase = Phase::WaitingForReadJob;

    let job = ReadJob::new(Arc::clone(shared), fd, conn);
    if let Err(e) = shared.read_pool.add_job(Box::new(job)) {
        warn!(fd, "failed to enqueue read job: {e}");
        shared.close_and_cleanup(fd, None);
    } else {
        debug!(fd, "queued read job");
    }
}
