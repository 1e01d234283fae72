use crate::{
    common::CONN_ID,
    server::{Connection, ServerCfg},
    service::IcapService,
};
use std::{io::Result, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    task,
};
use tracing::{debug, error, instrument, trace};

/// Accept loop: one spawned task per connection, each owning a cloned
/// service value. No state is shared between connections.
#[derive(Debug)]
pub struct TcpAcceptor<S>
where
    S: IcapService,
{
    sock: TcpListener,
    local_addr: SocketAddr,
    svc: S,
    cfg: Arc<ServerCfg>,
}

impl<S> TcpAcceptor<S>
where
    S: IcapService,
{
    pub async fn bind<A: ToSocketAddrs>(svc: S, addr: A, cfg: Arc<ServerCfg>) -> Result<Self> {
        let sock = TcpListener::bind(addr).await?;
        let local_addr = sock.local_addr()?;
        Ok(Self {
            sock,
            local_addr,
            svc,
            cfg,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[instrument(name = "tcp_acceptor", skip(self), fields(addr = %self.local_addr))]
    pub async fn run(&self) -> Result<()> {
        trace!("start...");
        loop {
            let (sock, addr) = self.sock.accept().await?;
            let conn_id = CONN_ID.next();
            let svc = self.svc.clone();
            let cfg = self.cfg.clone();
            debug!(addr = %addr, id = %conn_id, "accepted new connection");

            if sock.set_nodelay(true).is_err() {
                error!("failed to set TCP_NODELAY");
            }

            task::spawn(async move {
                let mut conn = Connection::new(conn_id, sock, svc, cfg);
                conn.process().await;
                trace!(id = %conn.id, "connection terminated");
            });
        }
    }
}
