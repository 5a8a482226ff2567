use std::convert::Infallible;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use http::{HeaderValue, Request, Response};
use ripple_http::channel::Inbound;
use ripple_http::handler::make_handler;
use ripple_http::resources::{LoopResources, PoolConfig};
use ripple_web::{DisposableServer, HttpClient, HttpResources, HttpServer, ResponseBody};

const BODY: &str = "hello";

fn resources() -> Arc<HttpResources> {
    let loops = LoopResources::new("compression-test", 1, 2, false).with_quiet_period(Duration::from_millis(10));
    Arc::new(HttpResources::new(loops, PoolConfig::default()))
}

async fn serve(resources: &Arc<HttpResources>, configure: impl FnOnce(HttpServer) -> HttpServer) -> DisposableServer {
    configure(HttpServer::create().host("127.0.0.1").resources(Arc::clone(resources)))
        .handle(make_handler(|_req: Request<Inbound<Bytes>>| async { Ok::<_, Infallible>(Response::new(ResponseBody::from(BODY))) }))
        .bind()
        .await
        .unwrap()
}

fn client(resources: &Arc<HttpResources>, server: &DisposableServer) -> HttpClient {
    HttpClient::create().resources(Arc::clone(resources)).base_url(&format!("http://127.0.0.1:{}", server.port()))
}

#[tokio::test]
async fn body_below_threshold_is_sent_as_is() {
    let resources = resources();
    let server = serve(&resources, |s| s.compress_min_size(25)).await;

    let head = client(&resources, &server).compress().get().uri("/").response().await.unwrap();
    assert_eq!(head.status(), 200);
    assert!(!head.headers().contains_key(CONTENT_ENCODING));

    let (_, body) = client(&resources, &server).compress().get().uri("/").response_single().await.unwrap();
    assert_eq!(body, BODY);

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn body_above_threshold_is_compressed_and_decoded() {
    let resources = resources();
    let server = serve(&resources, |s| s.compress_min_size(4)).await;

    let head = client(&resources, &server).compress().get().uri("/").response().await.unwrap();
    assert_eq!(head.headers()[CONTENT_ENCODING], "gzip");

    let (head, body) = client(&resources, &server).compress().get().uri("/").response_single().await.unwrap();
    assert!(!head.headers().contains_key(CONTENT_ENCODING));
    assert_eq!(body, BODY);

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn compressed_bytes_are_real_gzip() {
    let resources = resources();
    let server = serve(&resources, |s| s.compress(true)).await;

    let (head, body) = client(&resources, &server)
        .get()
        .uri("/")
        .header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"))
        .response_single()
        .await
        .unwrap();
    assert_eq!(head.headers()[CONTENT_ENCODING], "gzip");

    let mut decoded = String::new();
    GzDecoder::new(body.as_ref()).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, BODY);

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn clients_without_compression_get_identity() {
    let resources = resources();
    let server = serve(&resources, |s| s.compress(true)).await;

    let (head, body) = client(&resources, &server).no_compression().get().uri("/").response_single().await.unwrap();
    assert!(!head.headers().contains_key(CONTENT_ENCODING));
    assert_eq!(body, BODY);

    server.dispose();
    resources.dispose();
}

#[tokio::test]
async fn predicate_decides_regardless_of_size() {
    let resources = resources();
    let server = serve(&resources, |s| s.compress_when(|request, _| request.uri().path() == "/zip")).await;

    let zipped = client(&resources, &server).compress().get().uri("/zip").response().await.unwrap();
    assert_eq!(zipped.headers()[CONTENT_ENCODING], "gzip");

    let plain = client(&resources, &server).compress().get().uri("/plain").response().await.unwrap();
    assert!(!plain.headers().contains_key(CONTENT_ENCODING));

    server.dispose();
    resources.dispose();
}
