use btsmarthub2_exporter::{
    archive::Archive, config::RouterConfig, ErrorKind, PollState, Poller, Recorder,
};
use std::fs;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = include_str!("fixtures/connected.xml");

fn router_for(server: &MockServer) -> RouterConfig {
    let addr = server.address();
    RouterConfig {
        address: addr.ip().to_string(),
        port: addr.port(),
        timeout_ms: 500,
        ..RouterConfig::default()
    }
}

#[tokio::test]
async fn polls_with_referer_and_extracts() {
    let server = MockServer::start().await;
    let router = router_for(&server);
    Mock::given(method("GET"))
        .and(path("/nonAuth/wan_conn.xml"))
        .and(header("referer", router.referer().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .expect(1)
        .mount(&server)
        .await;

    let poller = Poller::new(&router, None).unwrap();
    let result = poller.poll_once().await;

    assert!(result.is_good(), "{:?}", result.errors);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.download_rate_bps, 65059000);
    assert!(result.timing.is_some());
}

#[tokio::test]
async fn error_status_is_still_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let recorder = Recorder::new().unwrap();
    let poller = Poller::new(&router_for(&server), None).unwrap();
    recorder.record(poller.poll_once().await);
    let result = poller.poll_once().await;

    assert_eq!(result.status_code, Some(500));
    assert_eq!(result.state, PollState::StructuralError);

    // The error page must not wipe what the good poll recorded.
    recorder.record(result);
    let text = recorder.render().unwrap();
    assert!(text.contains("btsmarthub2_connected 1"));
    assert!(text.contains("btsmarthub2_bb_bytes_down 67192513981"));
    assert!(text.contains("btsmarthub2_bb_speed_up 18567000"));
    assert!(text.contains("btsmarthub2_sysuptime_seconds 973412"));
    assert!(text.contains("btsmarthub2_connuptime_seconds 462385"));
    assert!(text.contains("btsmarthub2_status_code_total{status_code=\"500\"} 1"));
}

#[tokio::test]
async fn slow_hub_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(BODY)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let poller = Poller::new(&router_for(&server), None).unwrap();
    let result = poller.poll_once().await;

    assert_eq!(result.state, PollState::FetchFailed);
    assert_eq!(result.status_code, None);
    assert_eq!(result.decode_error().map(|e| e.kind()), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn archives_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    let poller = Poller::new(&router_for(&server), Some(archive)).unwrap();
    poller.poll_once().await;

    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let stored = fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
    assert_eq!(stored, BODY);
}

#[tokio::test]
async fn recorded_poll_is_exposed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .mount(&server)
        .await;

    let recorder = Recorder::new().unwrap();
    let poller = Poller::new(&router_for(&server), None).unwrap();
    recorder.record(poller.poll_once().await);

    let text = recorder.render().unwrap();
    assert!(text.contains("btsmarthub2_bb_bytes_down 67192513981"));
    assert!(text.contains("btsmarthub2_status_code_total{status_code=\"200\"} 1"));
}

#[test]
fn fetch_to_file_saves_body() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nonAuth/wan_conn.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;
        server
    });

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("wan_conn.xml");
    let status =
        btsmarthub2_exporter::poller::fetch_to_file(&router_for(&server), &output).unwrap();

    assert_eq!(status, 200);
    assert_eq!(fs::read_to_string(output).unwrap(), BODY);
}
