//! Server lifecycle state, stop handles and supervised server threads.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

use flume::RecvTimeoutError;

use crate::{
    ServerError, WebServer, config::DEFAULT_SHUTDOWN_TIMEOUT, contracts::ServerLifecycle as _,
};

/// Extra time `stop` waits on top of the shutdown timeout before giving up
/// on the serving thread.
const STOP_MARGIN: Duration = Duration::from_secs(5);

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

pub type ShutdownTrigger = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug)]
pub(crate) enum Startup {
    Listening(Option<SocketAddr>),
    Failed,
}

struct ControlState {
    state: ServerState,
    local_addr: Option<SocketAddr>,
    trigger: Option<ShutdownTrigger>,
    stop_requested: bool,
    shutdown_timeout: Duration,
    finished: Option<flume::Sender<()>>,
    startup: Option<flume::Sender<Startup>>,
}

/// Tracks one server through `Idle → Starting → Running → Stopped` and owns
/// the trigger that begins its graceful shutdown.
pub struct ServerControl {
    inner: Mutex<ControlState>,
    finished: flume::Receiver<()>,
}

impl Default for ServerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerControl {
    #[must_use]
    pub fn new() -> Self {
        // Nothing is ever sent: dropping the sender wakes every waiter.
        let (finished_tx, finished_rx) = flume::bounded(1);

        Self {
            inner: Mutex::new(ControlState {
                state: ServerState::Idle,
                local_addr: None,
                trigger: None,
                stop_requested: false,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
                finished: Some(finished_tx),
                startup: None,
            }),
            finished: finished_rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    /// Once started, a server never goes back to `Idle`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state() != ServerState::Idle
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// The grace period [`Self::shutdown`] allows in-flight requests.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.lock().shutdown_timeout
    }

    pub(crate) fn set_shutdown_timeout(&self, timeout: Duration) {
        self.lock().shutdown_timeout = timeout;
    }

    /// Stops the server with the current shutdown timeout.
    pub fn shutdown(&self) {
        self.stop(self.shutdown_timeout());
    }

    /// # Errors
    ///
    /// * [`ServerError::AlreadyStarted`] unless the server is idle
    pub(crate) fn begin_start(&self) -> Result<(), ServerError> {
        let mut inner = self.lock();
        if inner.state != ServerState::Idle {
            return Err(ServerError::AlreadyStarted);
        }
        inner.state = ServerState::Starting;
        Ok(())
    }

    /// Called by a backend once it accepts requests. If a stop was requested
    /// while starting, the trigger fires right away.
    pub fn mark_running(&self, local_addr: Option<SocketAddr>, trigger: ShutdownTrigger) {
        let mut inner = self.lock();
        inner.local_addr = local_addr;

        if let Some(startup) = inner.startup.take() {
            let _ = startup.send(Startup::Listening(local_addr));
        }

        if inner.stop_requested {
            inner.state = ServerState::Stopping;
            drop(inner);
            log::debug!("mark_running: stop was requested while starting");
            trigger();
        } else {
            inner.state = ServerState::Running;
            inner.trigger = Some(trigger);
        }
    }

    pub(crate) fn mark_stopped(&self) {
        let mut inner = self.lock();
        inner.state = ServerState::Stopped;
        inner.trigger = None;
        inner.startup = None;
        inner.finished = None;
    }

    pub(crate) fn set_startup_listener(&self, sender: flume::Sender<Startup>) {
        self.lock().startup = Some(sender);
    }

    /// Begins a graceful shutdown and waits for the serving side to finish,
    /// for at most `timeout` plus a short margin. A no-op on an idle or
    /// stopped server.
    pub fn stop(&self, timeout: Duration) {
        let trigger = {
            let mut inner = self.lock();
            match inner.state {
                ServerState::Idle | ServerState::Stopped => {
                    log::debug!("stop: server is {:?}, nothing to do", inner.state);
                    return;
                }
                ServerState::Starting => {
                    inner.stop_requested = true;
                    None
                }
                ServerState::Running => {
                    inner.state = ServerState::Stopping;
                    inner.trigger.take()
                }
                ServerState::Stopping => None,
            }
        };

        if let Some(trigger) = trigger {
            log::debug!("stop: triggering graceful shutdown");
            trigger();
        }

        match self.finished.recv_timeout(timeout + STOP_MARGIN) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::debug!("stop: server stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("stop: server did not stop within {timeout:?}");
            }
        }
    }
}

impl std::fmt::Debug for ServerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ServerControl")
            .field("state", &inner.state)
            .field("local_addr", &inner.local_addr)
            .field("stop_requested", &inner.stop_requested)
            .finish_non_exhaustive()
    }
}

/// A cloneable handle that stops a server from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    control: Arc<ServerControl>,
}

impl StopHandle {
    pub(crate) const fn new(control: Arc<ServerControl>) -> Self {
        Self { control }
    }

    /// Stops the server, allowing it the shutdown timeout configured at the
    /// time of the call.
    pub fn stop(&self) {
        self.control.shutdown();
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.control.shutdown_timeout()
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.control.state()
    }
}

/// A server running on its own named thread.
///
/// Dropping the task stops the server and joins the thread.
pub struct ServerTask {
    server: Arc<WebServer>,
    local_addr: Option<SocketAddr>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerTask {
    /// Runs `start_server` on a new thread and waits until the server listens
    /// or fails to start.
    ///
    /// # Errors
    ///
    /// * The error `start_server` failed with, if it failed before listening
    /// * [`ServerError::StartupTimeout`] if it neither listened nor failed in
    ///   time
    /// * [`ServerError::Io`] if the thread could not be spawned
    pub(crate) fn spawn(
        server: WebServer,
        host: &str,
        port: u16,
        startup_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let server = Arc::new(server);
        let (tx, rx) = flume::unbounded();
        server.control().set_startup_listener(tx.clone());

        let thread = std::thread::Builder::new()
            .name(format!("webadapters-{}-{port}", server.backend()))
            .spawn({
                let server = server.clone();
                let host = host.to_string();
                move || {
                    let result = server.start_server(&host, port);
                    if let Err(e) = &result {
                        log::error!("start_server failed: {e}");
                        let _ = tx.send(Startup::Failed);
                    }
                    result
                }
            })?;

        let mut task = Self {
            server,
            local_addr: None,
            thread: Some(thread),
        };

        match rx.recv_timeout(startup_timeout) {
            Ok(Startup::Listening(addr)) => {
                log::debug!("spawn: {} server listening on {addr:?}", task.server.backend());
                task.local_addr = addr;
                Ok(task)
            }
            Ok(Startup::Failed) | Err(RecvTimeoutError::Disconnected) => match task.join_thread() {
                Ok(()) => Err(ServerError::NotRunning {
                    operation: "spawn",
                }),
                Err(e) => Err(e),
            },
            Err(RecvTimeoutError::Timeout) => {
                task.stop();
                Err(ServerError::StartupTimeout(startup_timeout))
            }
        }
    }

    /// The bound address. `None` for backends without a listener.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[must_use]
    pub const fn server(&self) -> &Arc<WebServer> {
        &self.server
    }

    pub fn stop(&self) {
        if let Err(e) = self.server.stop_server() {
            log::error!("stop: {e}");
        }
    }

    /// Waits for the server thread to finish.
    ///
    /// # Errors
    ///
    /// * The error the server stopped with
    /// * [`ServerError::ServerPanicked`] if the server thread panicked
    pub fn join(mut self) -> Result<(), ServerError> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<(), ServerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServerError::ServerPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerTask {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
            if let Err(e) = self.join_thread() {
                log::error!("drop: server thread ended with {e}");
            }
        }
    }
}

impl std::fmt::Debug for ServerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTask")
            .field("backend", &self.server.backend())
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
