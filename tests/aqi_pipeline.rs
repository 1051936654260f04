//! End-to-end AQI retrieval against a mock archive server.

use std::io::{Cursor, Write};
use std::time::Duration;

use aqscraper::aqi::{aqi_schema, Aggregator, AqiError, AqiRequest, AqiScale, AqiTimeFrame};
use aqscraper::config::HttpConfig;
use aqscraper::fetch::LegacyClient;
use arrow::array::{Array, StringArray, TimestampSecondArray};
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate};
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

const HEADER: &str = "State Name,county Name,State Code,County Code,Date,AQI,Category,Defining Parameter,Defining Site,Number of Sites Reporting\n";

fn county_rows(year: i32, days: &[(u32, u32)]) -> String {
    let mut csv = String::from(HEADER);
    for (i, (m, d)) in days.iter().enumerate() {
        csv.push_str(&format!(
            "California,Fresno,06,019,{year}-{m:02}-{d:02},{},Moderate,PM2.5,06-019-0011,3\n",
            50 + i
        ));
        csv.push_str(&format!(
            "California,Kern,06,029,{year}-{m:02}-{d:02},99,Moderate,Ozone,06-029-0014,5\n"
        ));
    }
    csv
}

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

async fn mount_year(server: &MockServer, year: i32, days: &[(u32, u32)], delay: Duration) {
    let file = format!("daily_aqi_by_county_{year}");
    Mock::given(method("GET"))
        .and(path(format!("/airdata/{file}.zip")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zipped(&format!("{file}.csv"), &county_rows(year, days)))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// 2019 and 2020 are published, anything else is a 404.
async fn archive_server() -> MockServer {
    let server = MockServer::start().await;
    mount_year(&server, 2019, &[(6, 1), (12, 30), (12, 31)], Duration::from_millis(200)).await;
    mount_year(&server, 2020, &[(1, 1), (1, 2), (7, 4)], Duration::ZERO).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

fn init_logging() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("aqscraper=debug"))
        .with_test_writer()
        .try_init();
}

fn client() -> LegacyClient {
    init_logging();
    LegacyClient::new(&HttpConfig {
        max_retries: 0,
        initial_backoff_ms: 1,
        connect_timeout_secs: 2,
        timeout_secs: 10,
        ..HttpConfig::default()
    })
    .unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn request(start: NaiveDate, end: NaiveDate) -> AqiRequest {
    AqiRequest {
        time_frame: AqiTimeFrame::Daily,
        scale: AqiScale::County,
        state: "CA".into(),
        location: "Fresno".into(),
        start,
        end,
    }
}

fn dates(batch: &RecordBatch) -> Vec<NaiveDate> {
    let col = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampSecondArray>()
        .unwrap();
    (0..col.len())
        .map(|i| DateTime::from_timestamp(col.value(i), 0).unwrap().date_naive())
        .collect()
}

fn strings(batch: &RecordBatch, idx: usize) -> Vec<String> {
    let col = batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    (0..col.len()).map(|i| col.value(i).to_string()).collect()
}

#[tokio::test]
async fn test_years_concatenate_in_order_and_clip() {
    let server = archive_server().await;
    let client = client();
    let base = Url::parse(&format!("{}/airdata/", server.uri())).unwrap();

    // 2019 answers slowest; order must still follow the years
    let batch = Aggregator::new(&client, base)
        .with_max_concurrent_years(3)
        .aggregate(&request(day(2019, 12, 30), day(2021, 1, 5)))
        .await
        .unwrap();

    assert_eq!(
        dates(&batch),
        vec![
            day(2019, 12, 30),
            day(2019, 12, 31),
            day(2020, 1, 1),
            day(2020, 1, 2),
            day(2020, 7, 4),
        ]
    );
    assert!(strings(&batch, 4).iter().all(|s| s == "CA"));
    assert!(strings(&batch, 5).iter().all(|s| s == "Fresno"));
}

#[tokio::test]
async fn test_single_day_tags_match_inputs() {
    let server = archive_server().await;
    let client = client();
    let base = Url::parse(&format!("{}/airdata", server.uri())).unwrap();
    let aggregator = Aggregator::new(&client, base);

    for year in [2019, 2020, 2021] {
        let jan1 = day(year, 1, 1);
        let batch = aggregator.aggregate(&request(jan1, jan1)).await.unwrap();
        assert!(batch.num_rows() <= 1);
        assert!(strings(&batch, 4).iter().all(|s| s == "CA"));
        assert!(strings(&batch, 5).iter().all(|s| s == "Fresno"));
        assert!(dates(&batch).iter().all(|d| *d == jan1));
    }
}

#[tokio::test]
async fn test_per_year_calls_equal_range_call() {
    let server = archive_server().await;
    let client = client();
    let base = Url::parse(&format!("{}/airdata/", server.uri())).unwrap();
    let aggregator = Aggregator::new(&client, base).with_max_concurrent_years(1);

    let mut per_year = Vec::new();
    for year in 2018..=2021 {
        let req = request(day(year, 1, 1), day(year, 12, 31));
        per_year.push(aggregator.aggregate(&req).await.unwrap());
    }
    let stitched = concat_batches(&aqi_schema(), &per_year).unwrap();
    let whole = aggregator
        .aggregate(&request(day(2018, 1, 1), day(2021, 12, 31)))
        .await
        .unwrap();

    assert_eq!(whole.num_rows(), 6);
    assert_eq!(stitched, whole);
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let server = archive_server().await;
    let client = client();
    let base = Url::parse(&server.uri()).unwrap();

    let err = Aggregator::new(&client, base)
        .aggregate(&request(day(2020, 2, 1), day(2020, 1, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AqiError::InvalidRange { .. }));
    assert!(err.to_string().contains("2020-02-01"));
}

#[tokio::test]
async fn test_unpublished_years_give_empty_table() {
    let server = archive_server().await;
    let client = client();
    let base = Url::parse(&format!("{}/airdata/", server.uri())).unwrap();

    let batch = Aggregator::new(&client, base)
        .aggregate(&request(day(2022, 1, 1), day(2023, 12, 31)))
        .await
        .unwrap();
    assert_eq!(batch.num_rows(), 0);
    assert_eq!(batch.schema(), aqi_schema());
}

#[tokio::test]
async fn test_unknown_location_gives_empty_table() {
    let server = archive_server().await;
    let client = client();
    let base = Url::parse(&format!("{}/airdata/", server.uri())).unwrap();

    let mut req = request(day(2020, 1, 1), day(2020, 12, 31));
    req.location = "fresno".into(); // county names match verbatim
    let batch = Aggregator::new(&client, base).aggregate(&req).await.unwrap();
    assert_eq!(batch.num_rows(), 0);
}

#[tokio::test]
async fn test_unreachable_host_skips_years() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = client();
    let base = Url::parse(&format!("http://127.0.0.1:{port}/airdata/")).unwrap();

    let batch = Aggregator::new(&client, base)
        .aggregate(&request(day(2019, 1, 1), day(2020, 12, 31)))
        .await
        .unwrap();
    assert_eq!(batch.num_rows(), 0);
}

#[tokio::test]
async fn test_corrupt_archive_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a zip".to_vec()))
        .mount(&server)
        .await;
    let client = client();
    let base = Url::parse(&server.uri()).unwrap();

    let err = Aggregator::new(&client, base)
        .aggregate(&request(day(2020, 1, 1), day(2020, 1, 31)))
        .await
        .unwrap_err();
    assert!(matches!(err, AqiError::Fetch { year: 2020, .. }));
}
