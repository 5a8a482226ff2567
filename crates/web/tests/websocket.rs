use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::Request;
use ripple_http::channel::Inbound;
use ripple_http::handler::make_handler;
use ripple_http::resources::{LoopResources, PoolConfig};
use ripple_web::{DisposableServer, HttpClient, HttpResources, HttpServer, WebsocketError, websocket};
use tokio_tungstenite::tungstenite::Message;

/// A server greeting every websocket with the protocol it selected, then
/// echoing whatever the client sends.
async fn serve(resources: &Arc<HttpResources>, protocols: &'static str) -> DisposableServer {
    HttpServer::create()
        .host("127.0.0.1")
        .resources(Arc::clone(resources))
        .handle(make_handler(move |req: Request<Inbound<Bytes>>| async move {
            websocket::upgrade(&req, protocols, |mut ws, protocol| async move {
                let greeting = format!("SERVER:{}", protocol.as_deref().unwrap_or("null"));
                if ws.send(Message::text(greeting)).await.is_err() {
                    return;
                }
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() || ws.send(message).await.is_err() {
                        break;
                    }
                }
            })
        }))
        .bind()
        .await
        .unwrap()
}

fn resources() -> Arc<HttpResources> {
    let loops = LoopResources::new("websocket-test", 1, 2, false).with_quiet_period(Duration::from_millis(10));
    Arc::new(HttpResources::new(loops, PoolConfig::default()))
}

fn client(resources: &Arc<HttpResources>, server: &DisposableServer) -> HttpClient {
    HttpClient::create().resources(Arc::clone(resources)).base_url(&format!("http://127.0.0.1:{}", server.port()))
}

async fn next_text(session: &mut ripple_web::WebsocketSession) -> String {
    let message = tokio::time::timeout(Duration::from_secs(5), session.next()).await.unwrap().unwrap().unwrap();
    message.to_text().unwrap().to_string()
}

#[tokio::test]
async fn supported_protocol_is_selected_on_both_ends() {
    let resources = resources();
    let server = serve(&resources, "SUBPROTOCOL").await;

    let mut session = client(&resources, &server).get().uri("/test").websocket("SUBPROTOCOL,OTHER").await.unwrap();
    assert_eq!(session.protocol(), Some("SUBPROTOCOL"));
    assert_eq!(next_text(&mut session).await, "SERVER:SUBPROTOCOL");

    session.send(Message::text("ping")).await.unwrap();
    assert_eq!(next_text(&mut session).await, "ping");
    session.close().await.unwrap();

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn client_preference_decides() {
    let resources = resources();
    let server = serve(&resources, "NOT, Common").await;

    let mut session = client(&resources, &server).get().uri("/test").websocket("Common,OTHER").await.unwrap();
    assert_eq!(session.protocol(), Some("Common"));
    assert_eq!(next_text(&mut session).await, "SERVER:Common");

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn wildcard_selects_the_first_client_entry() {
    let resources = resources();
    let server = serve(&resources, "proto2,*").await;

    let mut session = client(&resources, &server).get().uri("/test").websocket("proto1, proto2").await.unwrap();
    assert_eq!(session.protocol(), Some("proto1"));
    assert_eq!(next_text(&mut session).await, "SERVER:proto1");

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn no_protocol_on_either_end() {
    let resources = resources();
    let server = serve(&resources, "").await;

    let mut session = client(&resources, &server).get().uri("/test").websocket("").await.unwrap();
    assert_eq!(session.protocol(), None);
    assert_eq!(next_text(&mut session).await, "SERVER:null");

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn unsupported_protocols_fail_negotiation() {
    let resources = resources();
    let server = serve(&resources, "protoA,protoB").await;

    let error = client(&resources, &server).get().uri("/test").websocket("SUBPROTOCOL,OTHER").await.unwrap_err();
    assert_eq!(error.to_string(), "Invalid subprotocol. Actual: null. Expected one of: SUBPROTOCOL,OTHER");

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn server_without_protocols_fails_negotiation() {
    let resources = resources();
    let server = serve(&resources, "").await;

    let error = client(&resources, &server).get().uri("/test").websocket("SUBPROTOCOL,OTHER").await.unwrap_err();
    assert!(matches!(error, ripple_web::ClientError::Websocket { source: WebsocketError::Negotiation { actual: None, .. } }));

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn plain_requests_are_refused() {
    let resources = resources();
    let server = serve(&resources, "SUBPROTOCOL").await;

    let head = client(&resources, &server).get().uri("/test").response().await.unwrap();
    assert_eq!(head.status(), 500);

    server.dispose();
    resources.dispose();
}
