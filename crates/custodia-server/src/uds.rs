//! Unix-domain-socket peer credentials.
//!
//! When the server binds a `UnixListener` (see [`crate::config::BindTarget::Unix`]),
//! Axum's connect-info machinery runs this on every accepted connection and
//! makes the result available to handlers via `ConnectInfo<UdsConnectInfo>`.
//! TCP connections never populate this extractor, so the fallback handler
//! treats its absence the same as an absent peer.

use custodia_core::request::PeerCreds;

/// Peer credentials captured at accept time on a Unix-domain-socket
/// connection, via `SO_PEERCRED` (exposed by `tokio::net::UnixStream::peer_cred`).
#[derive(Debug, Clone, Copy)]
pub struct UdsConnectInfo {
    pub peer: Option<PeerCreds>,
}

#[cfg(unix)]
mod connected {
    use axum::extract::connect_info::Connected;
    use axum::serve::IncomingStream;
    use tokio::net::UnixListener;

    use custodia_core::request::PeerCreds;

    use super::UdsConnectInfo;

    impl Connected<IncomingStream<'_, UnixListener>> for UdsConnectInfo {
        fn connect_info(stream: IncomingStream<'_, UnixListener>) -> Self {
            let peer = stream.io().peer_cred().ok().map(|cred| PeerCreds {
                pid: cred.pid().map(|p| p as i32).unwrap_or(0),
                uid: cred.uid(),
                gid: cred.gid(),
            });
            Self { peer }
        }
    }
}
