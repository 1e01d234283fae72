use icap_engine::{
    server::{Exchange, ServerCfg, TcpAcceptor},
    service::{IcapService, ServiceResult},
    DEFAULT_ISTAG,
};

use http::StatusCode;
use std::{future::Future, io::Result};
use tracing::info;

/// Inspects nothing and changes nothing: every REQMOD/RESPMOD request is
/// answered with `204 No Content`.
#[derive(Debug, Clone)]
struct PassThrough;

impl IcapService for PassThrough {
    fn handle_options(
        &mut self,
        xchg: &mut Exchange<'_>,
    ) -> impl Future<Output = ServiceResult> + Send {
        async move {
            info!("got OPTIONS call");
            xchg.set_status(StatusCode::OK);
            xchg.set_header("Methods", "RESPMOD");
            xchg.set_header("ISTag", DEFAULT_ISTAG);
            xchg.set_header("Preview", "0");
            xchg.send_headers(false).await?;
            Ok(())
        }
    }

    fn handle_reqmod(
        &mut self,
        xchg: &mut Exchange<'_>,
    ) -> impl Future<Output = ServiceResult> + Send {
        async move {
            info!("got REQMOD call");
            xchg.no_adaptation_required().await?;
            Ok(())
        }
    }

    fn handle_respmod(
        &mut self,
        xchg: &mut Exchange<'_>,
    ) -> impl Future<Output = ServiceResult> + Send {
        async move {
            info!("got RESPMOD call");
            xchg.no_adaptation_required().await?;
            Ok(())
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = ServerCfg::builder().build();
    let l = TcpAcceptor::bind(PassThrough, "127.0.0.1:13440", cfg).await?;

    l.run().await
}
