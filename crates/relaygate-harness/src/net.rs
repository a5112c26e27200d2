//! Loopback servers.

use std::{net::SocketAddr, sync::Arc};

use relaygate_core::{
    Acceptor, DefaultServer, MessageListener, ServerConfig, ServerError, ServiceRegistration, StateListener,
};
use relaygate_transport::TcpUpgrader;
use tokio::net::TcpListener;
use tracing::warn;

/// An unused `127.0.0.1:<port>` address.
///
/// The port is released before returning, so another process could take
/// it in between. Good enough for tests that need to know the address
/// before the server binds.
pub async fn free_addr() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    listener.local_addr()
}

/// Bind a tcp server on an ephemeral loopback port and serve it in the
/// background.
pub async fn spawn_server(
    service: ServiceRegistration,
    config: ServerConfig,
    acceptor: Arc<dyn Acceptor>,
    listener: Arc<dyn MessageListener>,
    state: Option<Arc<dyn StateListener>>,
) -> Result<(Arc<DefaultServer<TcpUpgrader>>, SocketAddr), ServerError> {
    let mut server = DefaultServer::new("127.0.0.1:0", service, TcpUpgrader, config);
    server.set_acceptor(acceptor);
    server.set_message_listener(listener);
    if let Some(state) = state {
        server.set_state_listener(state);
    }
    let server = Arc::new(server);

    let bound = server.bind().await?;
    let addr = bound.local_addr().map_err(|source| ServerError::Bind { addr: "127.0.0.1:0".into(), source })?;
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = serving.serve(bound).await {
            warn!(error = %e, "loopback server exited");
        }
    });
    Ok((server, addr))
}
