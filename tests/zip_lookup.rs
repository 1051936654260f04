use std::io::{Cursor, Write};

use aqscraper::aqi::{Aggregator, AqiScale};
use aqscraper::config::{self, AqiJob, HttpConfig};
use aqscraper::fetch::LegacyClient;
use aqscraper::zipcode::{resolve_zip, ZipLookupError};
use arrow::array::{Array, Int64Array, StringArray};
use chrono::NaiveDate;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

const LOOKUP_PATH: &str = "/cgi-bin/ziplook.exe";

const FOUND_PAGE: &str = r#"<html><head><title>ZIP lookup</title></head><body>
<table width="100%"><tr><td><a href="/">Home</a></td></tr></table>
<table border="1" cellpadding="3">
<tr><td><b>ZIP Code</b></td><td><b>City and State</b></td><td><b>County</b></td><td><b>Area Code</b></td></tr>
<tr><td>94105</td><td>SAN FRANCISCO, CA</td><td>SAN FRANCISCO</td><td>415</td></tr>
</table>
</body></html>"#;

const EMPTY_PAGE: &str = r#"<html><body>
<table><tr><td>ZIP Code</td><td>City and State</td></tr></table>
<p>No matching entries.</p>
</body></html>"#;

fn client() -> LegacyClient {
    LegacyClient::new(&HttpConfig {
        max_retries: 0,
        ..HttpConfig::default()
    })
    .unwrap()
}

async fn lookup_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LOOKUP_PATH))
        .and(query_param("Zip", "94105"))
        .and(query_param("What", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FOUND_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LOOKUP_PATH))
        .and(query_param("Zip", "00001"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LOOKUP_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

fn lookup_base(server: &MockServer) -> Url {
    Url::parse(&format!("{}{}", server.uri(), LOOKUP_PATH)).unwrap()
}

#[tokio::test]
async fn test_resolves_city_state_county() {
    let server = lookup_server().await;
    let lookup = resolve_zip(&client(), &lookup_base(&server), 94105)
        .await
        .unwrap();

    let rec = lookup.primary().unwrap();
    assert_eq!(rec.zip, 94105);
    assert_eq!(rec.city, "SAN FRANCISCO");
    assert_eq!(rec.state, "CA");
    assert_eq!(rec.county, "SAN FRANCISCO");
    assert_eq!(lookup.location_for(AqiScale::County).as_deref(), Some("San Francisco"));
}

#[tokio::test]
async fn test_page_without_rows_is_not_found() {
    let server = lookup_server().await;
    let err = resolve_zip(&client(), &lookup_base(&server), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ZipLookupError::NotFound(1)));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = lookup_server().await;
    let err = resolve_zip(&client(), &lookup_base(&server), 10001)
        .await
        .unwrap_err();
    match err {
        ZipLookupError::Status { zip, status } => {
            assert_eq!(zip, 10001);
            assert_eq!(status.as_u16(), 503);
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_six_digit_zip_is_rejected_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let err = resolve_zip(&client(), &lookup_base(&server), 123_456)
        .await
        .unwrap_err();
    assert!(matches!(err, ZipLookupError::InvalidZip(123_456)));
}

#[tokio::test]
async fn test_lookup_fills_state_and_location() {
    let server = lookup_server().await;
    let lookup = resolve_zip(&client(), &lookup_base(&server), 94105)
        .await
        .unwrap();

    let job: AqiJob = serde_yaml::from_str(
        "time_frame: daily\nscale: county\nzip_code: \"94105\"\nstart_date: \"2020-03-01\"\n",
    )
    .unwrap();
    assert!(job.needs_zip_lookup());

    let req = job.resolve(Some(&lookup)).unwrap();
    assert_eq!(req.state, "CA");
    assert_eq!(req.location, "San Francisco");
    assert_eq!(req.start, NaiveDate::from_ymd_opt(2020, 3, 1).unwrap());
    assert_eq!(req.end, NaiveDate::from_ymd_opt(2020, 12, 31).unwrap());
}

const SF_ARCHIVE_CSV: &str = "\
State Name,county Name,State Code,County Code,Date,AQI,Category,Defining Parameter,Defining Site,Number of Sites Reporting
California,San Francisco,06,075,2020-03-02,38,Good,PM2.5,06-075-0005,2
California,San Francisco,06,075,2020-03-01,44,Good,Ozone,06-075-0005,2
California,San Francisco,06,075,2020-02-29,61,Moderate,PM2.5,06-075-0005,2
California,San Mateo,06,081,2020-03-01,30,Good,Ozone,06-081-1001,1
";

fn zipped(name: &str, content: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        zip.start_file(name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[tokio::test]
async fn test_zip_derived_request_finds_archive_rows() {
    let server = lookup_server().await;
    Mock::given(method("GET"))
        .and(path("/airdata/daily_aqi_by_county_2020.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zipped(
            "daily_aqi_by_county_2020.csv",
            SF_ARCHIVE_CSV,
        )))
        .mount(&server)
        .await;
    let client = client();

    let job: AqiJob = serde_yaml::from_str(
        "time_frame: daily\nscale: county\nzip_code: 94105\nstart_date: 2020-03-01\n",
    )
    .unwrap();
    assert!(config::validate(&job).is_empty());

    let lookup = resolve_zip(&client, &lookup_base(&server), 94105)
        .await
        .unwrap();
    let req = job.resolve(Some(&lookup)).unwrap();

    let base = Url::parse(&format!("{}/airdata/", server.uri())).unwrap();
    let batch = Aggregator::new(&client, base).aggregate(&req).await.unwrap();

    assert_eq!(batch.num_rows(), 2);
    let aqi = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
    assert_eq!(aqi.values().to_vec(), vec![44, 38]);
    let location = batch.column(5).as_any().downcast_ref::<StringArray>().unwrap();
    assert!((0..location.len()).all(|i| location.value(i) == "San Francisco"));
    let state = batch.column(4).as_any().downcast_ref::<StringArray>().unwrap();
    assert!((0..state.len()).all(|i| state.value(i) == "CA"));
}
