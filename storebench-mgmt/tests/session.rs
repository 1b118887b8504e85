use reqwest::{Method, StatusCode};
use storebench_mgmt::{AuthError, ManagementSession, ResourceProvisioner, RequestError};
use storebench_test::server::{API_TOKEN, ArrayState, TestArray, TestInterface};

#[tokio::test]
async fn negotiates_highest_common_version() {
    storebench_test::tracing::init();
    let array = TestArray::new().await;

    let mut session = ManagementSession::connect(&array.url(), API_TOKEN)
        .await
        .unwrap();

    assert_eq!(session.version(), "1.11");
    assert!(session.is_authenticated());
    assert_eq!(array.state().logins, 1);

    session.close().await;
    assert!(!session.is_authenticated());
    assert_eq!(array.state().logouts, 1);
    assert!(array.state().sessions.is_empty());
}

#[tokio::test]
async fn restricted_versions_limit_negotiation() {
    let array = TestArray::new().await;

    let session = ManagementSession::builder(&array.url())
        .api_token(API_TOKEN)
        .supported_versions(&["1.0", "1.2", "1.9"])
        .connect()
        .await
        .unwrap();
    assert_eq!(session.version(), "1.2");

    let error = ManagementSession::builder(&array.url())
        .api_token(API_TOKEN)
        .supported_versions(&["1.9"])
        .connect()
        .await
        .unwrap_err();
    assert!(matches!(error, AuthError::NoCommonVersion { .. }));
}

#[tokio::test]
async fn fails_without_common_version() {
    let mut state = ArrayState::with_two_subnets();
    state.versions = vec!["2.0".into(), "2.1".into()];
    let array = TestArray::with_state(state).await;

    let error = ManagementSession::connect(&array.url(), API_TOKEN)
        .await
        .unwrap_err();

    match error {
        AuthError::NoCommonVersion { offered, .. } => assert_eq!(offered, ["2.0", "2.1"]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(array.state().logins, 0);
}

#[tokio::test]
async fn rejects_invalid_api_token() {
    let array = TestArray::new().await;

    let error = ManagementSession::connect(&array.url(), "wrong-token")
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        AuthError::Rejected {
            status: StatusCode::UNAUTHORIZED,
            ..
        }
    ));
}

#[tokio::test]
async fn unreachable_endpoint_fails_discovery() {
    // Bind and drop a listener to get a port nobody listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let error = ManagementSession::connect(&format!("http://127.0.0.1:{port}"), API_TOKEN)
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::VersionDiscovery { .. }));
}

#[tokio::test]
async fn requests_after_close_are_rejected_locally() {
    let array = TestArray::new().await;
    let mut session = ManagementSession::connect(&array.url(), API_TOKEN)
        .await
        .unwrap();
    session.close().await;

    let error = session
        .request(Method::GET, "network-interfaces", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(error, RequestError::NotConnected { .. }));

    // Closing twice does not log out twice.
    session.close().await;
    assert_eq!(array.state().logouts, 1);
}

#[tokio::test]
async fn error_status_carries_response_body() {
    let array = TestArray::new().await;
    let session = ManagementSession::connect(&array.url(), API_TOKEN)
        .await
        .unwrap();
    array.state().fail(Method::GET, "network-interfaces");

    let error = session
        .request(Method::GET, "network-interfaces", &[], None)
        .await
        .unwrap_err();

    assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(error.to_string().contains("injected failure"));
}

#[tokio::test]
async fn discovery_follows_continuation_tokens() {
    let mut state = ArrayState::with_two_subnets();
    state.interfaces = vec![
        TestInterface::data("data3", "10.0.3.5", "net3"),
        TestInterface::management("mgmt0", "10.0.0.10", "mgmt"),
        TestInterface::data("data1a", "10.0.1.5", "net1"),
        TestInterface::data("data1b", "10.0.1.6", "net1"),
        TestInterface::data("data2", "10.0.2.5", "net2"),
    ];
    state.page_size = Some(2);
    let array = TestArray::with_state(state).await;

    let mut session = ManagementSession::connect(&array.url(), API_TOKEN)
        .await
        .unwrap();
    let provisioner = ResourceProvisioner::new(&session);
    let endpoints = provisioner.discover_data_endpoints().await.unwrap();

    assert_eq!(endpoints.len(), 3);
    let picked: Vec<_> = endpoints
        .one_per_subnet()
        .map(|endpoint| endpoint.address.as_str())
        .collect();
    assert_eq!(picked, ["10.0.1.5", "10.0.2.5", "10.0.3.5"]);

    session.close().await;
}

#[tokio::test]
async fn no_data_interfaces_is_empty() {
    let mut state = ArrayState::with_two_subnets();
    state.interfaces = vec![TestInterface::management("mgmt0", "10.0.0.10", "mgmt")];
    let array = TestArray::with_state(state).await;

    let session = ManagementSession::connect(&array.url(), API_TOKEN)
        .await
        .unwrap();
    let endpoints = ResourceProvisioner::new(&session)
        .discover_data_endpoints()
        .await
        .unwrap();

    assert!(endpoints.is_empty());
}
