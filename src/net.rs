//! WebSocket transport for relay connections.

use anyhow::{anyhow, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Blanket trait for boxed async read/write streams.
pub(crate) trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

pub(crate) type WsStream =
    WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Establish a WebSocket connection to a relay, optionally via a SOCKS5
/// proxy. TLS is negotiated for `wss://` URLs.
pub(crate) async fn connect(relay: &str, socks_proxy: Option<&str>) -> Result<WsStream> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = socks_proxy {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn connects_and_exchanges_text_frames() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(txt))) = ws.next().await {
                ws.send(Message::Text(format!("echo {txt}"))).await.unwrap();
            }
        });

        let mut ws = connect(&format!("ws://{addr}"), None).await.unwrap();
        ws.send(Message::Text("ping".into())).await.unwrap();
        match ws.next().await {
            Some(Ok(Message::Text(txt))) => assert_eq!(txt, "echo ping"),
            other => panic!("unexpected frame: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_url_without_host() {
        assert!(connect("ws://", None).await.is_err());
    }

    #[tokio::test]
    async fn connect_failure_is_an_error_not_a_panic() {
        // Port 1 on localhost is almost certainly closed.
        assert!(connect("ws://127.0.0.1:1", None).await.is_err());
    }
}
