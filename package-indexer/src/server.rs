use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    admission,
    config::ServerConfig,
    connection::{Closed, handle_connection},
    indexer::Indexer,
    store::{MapStore, PackageStore},
};

type Accepted = (TcpStream, SocketAddr);

/// Pause before accepting again after a listener-level failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Connections a stopped server is still serving.
///
/// Returned by [`Server::run_until`] once the listener is closed. Queued
/// connections still get a worker slot and every connection runs until its
/// peer leaves. Dropping this handle detaches them from the caller.
#[must_use = "dropping the handle detaches connections that are still open"]
#[derive(Debug)]
pub struct Drain {
    dispatcher: JoinHandle<()>,
}

impl Drain {
    /// Waits until every queued and running connection has closed.
    pub async fn wait(self) {
        if let Err(err) = self.dispatcher.await {
            warn!(error = ?err, "connection dispatcher failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.dispatcher.is_finished()
    }
}

pub struct Server<S = MapStore> {
    listener: TcpListener,
    indexer: Arc<Indexer<S>>,
    config: ServerConfig,
}

impl Server<MapStore> {
    /// Serves a fresh, empty index on `listener`.
    pub fn new(listener: TcpListener, config: ServerConfig) -> Result<Self> {
        Self::with_indexer(listener, Arc::new(Indexer::new()), config)
    }
}

impl<S: PackageStore + 'static> Server<S> {
    pub fn with_indexer(
        listener: TcpListener,
        indexer: Arc<Indexer<S>>,
        config: ServerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            listener,
            indexer,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the index shared by every connection.
    pub fn indexer(&self) -> Arc<Indexer<S>> {
        Arc::clone(&self.indexer)
    }

    /// Accepts connections until `shutdown` resolves, then closes the
    /// listener.
    ///
    /// Accepted sockets go through the admission queue; when every worker slot
    /// is busy and the queue is full, accepting stalls until a connection
    /// closes. Sockets already admitted are still served after shutdown; the
    /// returned [`Drain`] resolves once the last of them closes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<Drain>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            indexer,
            config,
        } = self;
        let (queue, dispatcher) =
            admission::bounded::<Accepted>(config.max_connections, config.queue_capacity);
        let idle_timeout = config.idle_timeout;
        debug!(
            workers = dispatcher.workers(),
            queue_capacity = config.queue_capacity,
            ?idle_timeout,
            "admission configured"
        );

        let dispatch = tokio::spawn(dispatcher.run(move |(stream, peer)| {
            serve_connection(stream, peer, Arc::clone(&indexer), idle_timeout)
        }));
        tokio::pin!(shutdown);

        loop {
            let accepted = select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(error = ?err, "failed to accept connection");
                    if let Some(pause) = accept_backoff(&err) {
                        select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                    continue;
                }
            };
            debug!(
                %peer,
                queued = queue.queued(),
                busy = queue.busy_slots(),
                "connection accepted"
            );

            select! {
                _ = &mut shutdown => break,
                admitted = queue.admit((stream, peer)) => {
                    if let Err(err) = admitted {
                        warn!(%peer, error = %err, "dropping accepted connection");
                        break;
                    }
                }
            }
        }

        info!(
            queued = queue.queued(),
            busy = queue.busy_slots(),
            "package indexer stopped accepting connections"
        );
        drop(listener);
        drop(queue);
        Ok(Drain {
            dispatcher: dispatch,
        })
    }

    pub async fn run_until_ctrl_c(self) -> Result<Drain> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn serve_connection<S: PackageStore>(
    stream: TcpStream,
    peer: SocketAddr,
    indexer: Arc<Indexer<S>>,
    idle_timeout: Option<Duration>,
) {
    debug!(%peer, "serving connection");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    match handle_connection(&mut reader, &mut writer, &*indexer, idle_timeout).await {
        Ok(Closed::PeerClosed) => debug!(%peer, "connection closed by peer"),
        Ok(Closed::IdleTimeout) => info!(%peer, "closed idle connection"),
        Ok(Closed::LineTooLong) => info!(%peer, "closed connection after oversized request"),
        Err(err) => warn!(%peer, error = ?err, "connection closed with error"),
    }
}

/// How long to wait before the next accept after `err`, if at all.
///
/// Failures tied to a single incoming connection are retried at once. Anything
/// else, such as running out of file descriptors, tends to repeat on the very
/// next call.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_connection_accept_errors_retry_immediately() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(accept_backoff(&io::Error::from(kind)), None, "{kind:?}");
        }
    }

    #[test]
    fn listener_accept_errors_back_off() {
        let exhausted = io::Error::from_raw_os_error(24); // EMFILE
        assert_eq!(accept_backoff(&exhausted), Some(ACCEPT_BACKOFF));
        assert_eq!(
            accept_backoff(&io::Error::other("listener broken")),
            Some(ACCEPT_BACKOFF)
        );
    }
}
