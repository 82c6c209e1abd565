use rdm_core::transport::{RequestContext, TransportClient};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn probe_reads_content_length_and_accept_ranges() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/file.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", "1048576")
                .insert_header("accept-ranges", "bytes"),
        )
        .mount(&server)
        .await;

    let client = TransportClient::new(None).unwrap();
    let ctx = RequestContext {
        url: format!("{}/file.zip", server.uri()),
        ..Default::default()
    };

    let probe = client.probe(&ctx).await.unwrap();
    assert_eq!(probe.total_size, Some(1_048_576));
    assert!(probe.supports_range);
}

#[tokio::test]
async fn probe_without_accept_ranges_reports_no_range_support() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/file.zip"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "10"))
        .mount(&server)
        .await;

    let client = TransportClient::new(None).unwrap();
    let ctx = RequestContext {
        url: format!("{}/file.zip", server.uri()),
        ..Default::default()
    };

    let probe = client.probe(&ctx).await.unwrap();
    assert!(!probe.supports_range);
}

#[tokio::test]
async fn get_stream_sends_no_range_header_for_a_fresh_single_segment_read() {
    // Mirrors what the segmented engine does for a fresh (non-resuming)
    // single-segment download: start = 0, end = None. A server with no
    // range support at all must still be downloadable in this mode, so no
    // Range header should be sent and a plain 200 must be accepted.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 17]))
        .mount(&server)
        .await;

    let client = TransportClient::new(None).unwrap();
    let ctx = RequestContext {
        url: format!("{}/file.zip", server.uri()),
        ..Default::default()
    };

    let result = client.get_stream(&ctx, 0, None).await;
    assert!(result.is_ok());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("Range").is_none());
}

#[tokio::test]
async fn get_stream_fails_when_server_ignores_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/file.zip"))
        .and(header("range", "bytes=10-19"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 100]))
        .mount(&server)
        .await;

    let client = TransportClient::new(None).unwrap();
    let ctx = RequestContext {
        url: format!("{}/file.zip", server.uri()),
        ..Default::default()
    };

    let result = client.get_stream(&ctx, 10, Some(19)).await;
    assert!(result.is_err());
}
