//! Weather client behaviour against a mock HTTP server.

use std::time::Duration;

use geoweather_core::{Coordinate, FetchError, HttpStatus, OpenWeatherClient, Units, WeatherClient};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

const LONDON: &str = include_str!("fixtures/london.json");

fn london() -> Coordinate {
    Coordinate::new(51.5, -0.12)
}

fn client_for(server: &MockServer, timeout: Duration) -> OpenWeatherClient {
    OpenWeatherClient::with_endpoint("TEST_KEY".into(), &server.uri(), timeout)
        .expect("Failed to create client")
}

async fn respond_with(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn sends_coordinates_units_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather"))
        .and(query_param("lat", "51.5"))
        .and(query_param("lon", "-0.12"))
        .and(query_param("units", "imperial"))
        .and(query_param("appid", "TEST_KEY"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LONDON))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(5));
    let weather = client.fetch_weather(london(), Units::Imperial).await.expect("success");

    assert_eq!(weather.name, "London");
    assert_eq!(weather.conditions().len(), 2);
    assert_eq!(weather.main.humidity, 87);
    assert_eq!(weather.sys.sunset, 1_699_977_600);
}

#[tokio::test]
async fn bad_request_is_classified() {
    let server = MockServer::start().await;
    respond_with(&server, ResponseTemplate::new(400).set_body_string(r#"{"cod":"400"}"#)).await;

    let err = client_for(&server, Duration::from_secs(5))
        .fetch_weather(london(), Units::Metric)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Http { status: HttpStatus::BadRequest }));
}

#[tokio::test]
async fn not_found_is_classified() {
    let server = MockServer::start().await;
    respond_with(&server, ResponseTemplate::new(404)).await;

    let err = client_for(&server, Duration::from_secs(5))
        .fetch_weather(london(), Units::Metric)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Http { status: HttpStatus::NotFound }));
}

#[tokio::test]
async fn other_statuses_are_generic() {
    for code in [401, 429, 500, 503] {
        let server = MockServer::start().await;
        respond_with(&server, ResponseTemplate::new(code)).await;

        let err = client_for(&server, Duration::from_secs(5))
            .fetch_weather(london(), Units::Metric)
            .await
            .unwrap_err();
        match err {
            FetchError::Http { status: HttpStatus::Other(got) } => assert_eq!(got, code),
            other => panic!("unexpected outcome for {code}: {other:?}"),
        }
    }
}

#[tokio::test]
async fn unparsable_body_is_malformed() {
    let server = MockServer::start().await;
    respond_with(&server, ResponseTemplate::new(200).set_body_string("<html>oops</html>")).await;

    let err = client_for(&server, Duration::from_secs(5))
        .fetch_weather(london(), Units::Metric)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)));
}

#[tokio::test]
async fn empty_condition_list_is_malformed() {
    let server = MockServer::start().await;
    let mut body: serde_json::Value = serde_json::from_str(LONDON).expect("fixture");
    body["weather"] = serde_json::json!([]);
    respond_with(&server, ResponseTemplate::new(200).set_body_json(body)).await;

    let err = client_for(&server, Duration::from_secs(5))
        .fetch_weather(london(), Units::Metric)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Malformed(_)));
}

#[tokio::test]
async fn slow_server_is_a_transport_failure() {
    let server = MockServer::start().await;
    respond_with(
        &server,
        ResponseTemplate::new(200).set_body_string(LONDON).set_delay(Duration::from_secs(2)),
    )
    .await;

    let err = client_for(&server, Duration::from_millis(200))
        .fetch_weather(london(), Units::Metric)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)));
}

#[tokio::test]
async fn refused_connection_is_a_transport_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let uri = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let client = OpenWeatherClient::with_endpoint("TEST_KEY".into(), &uri, Duration::from_secs(2))
        .expect("client");
    let err = client.fetch_weather(london(), Units::Metric).await.unwrap_err();

    assert!(matches!(err, FetchError::Transport(_)));
    assert!(!err.to_string().contains("TEST_KEY"));
}
