// src/zipcode/mod.rs
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, trace};
use url::Url;

use crate::aqi::{title_case, AqiScale};
use crate::fetch::{LegacyClient, TransportError};

/// Literal that marks both the lookup table and its header row.
const HEADER_TOKEN: &str = "ZIP";

#[derive(Debug, Error)]
pub enum ZipLookupError {
    #[error("invalid ZIP code {0}: expected at most five digits")]
    InvalidZip(u32),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("ZIP lookup for {zip:05} returned HTTP {status}")]
    Status { zip: u32, status: StatusCode },
    #[error("no ZIP table rows found for {0:05}")]
    NotFound(u32),
}

/// One row of the lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipRecord {
    pub zip: u32,
    pub city: String,
    pub state: String,
    pub county: String,
}

/// Every row the lookup page returned for one query.
///
/// ZIPs that straddle a city or county line come back as several rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipLookup {
    pub query: u32,
    pub records: Vec<ZipRecord>,
}

impl ZipLookup {
    /// First row for the queried ZIP, else the first row on the page.
    pub fn primary(&self) -> Option<&ZipRecord> {
        self.records
            .iter()
            .find(|r| r.zip == self.query)
            .or_else(|| self.records.first())
    }

    /// Location string an AQI request at `scale` would use.
    ///
    /// The lookup page shouts (`SAN FRANCISCO`) while the archives use title case,
    /// so the city or county is title-cased here.
    pub fn location_for(&self, scale: AqiScale) -> Option<String> {
        self.primary().map(|r| match scale {
            AqiScale::City => title_case(r.city.trim()),
            AqiScale::County => title_case(r.county.trim()),
        })
    }
}

/// `{base}?What=1&Zip={zip:05}&Submit=Look+It+Up`
pub fn lookup_url(base: &Url, zip: u32) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair("What", "1")
        .append_pair("Zip", &format!("{:05}", zip))
        .append_pair("Submit", "Look It Up");
    url
}

fn row_fields(row: ElementRef<'_>, cell_sel: &Selector, row_text: &str) -> Vec<String> {
    let cells: Vec<String> = row
        .select(cell_sel)
        .map(|c| c.text().collect::<String>().trim().to_string())
        .collect();
    if cells.len() >= 3 {
        return cells;
    }
    // single-cell rows carry their fields newline-separated
    row_text
        .split('\n')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_fields(fields: &[String]) -> Option<ZipRecord> {
    let [zip, city_state, county, ..] = fields else {
        return None;
    };
    let zip: u32 = zip.trim().parse().ok()?;
    let (city, state) = city_state.rsplit_once(',')?;
    Some(ZipRecord {
        zip,
        city: city.trim().to_string(),
        state: state.trim().to_string(),
        county: county.trim().to_string(),
    })
}

/// Extract every data row from tables whose text mentions `ZIP`.
///
/// Rows that themselves mention `ZIP` are headers. Rows that do not split into
/// ZIP, `"City, ST"`, county (and area) are skipped.
pub fn parse_zip_table(html: &str) -> Vec<ZipRecord> {
    let doc = Html::parse_document(html);
    let table_sel = Selector::parse("table").expect("CSS selector for tables should be valid");
    let row_sel = Selector::parse("tr").expect("CSS selector for rows should be valid");
    let cell_sel = Selector::parse("td, th").expect("CSS selector for cells should be valid");

    let mut records: Vec<ZipRecord> = Vec::new();
    for table in doc.select(&table_sel) {
        if !table.text().any(|t| t.contains(HEADER_TOKEN)) {
            continue;
        }
        for row in table.select(&row_sel) {
            let row_text: String = row.text().collect();
            if row_text.contains(HEADER_TOKEN) {
                continue;
            }
            let fields = row_fields(row, &cell_sel, &row_text);
            match parse_fields(&fields) {
                // nested layout tables surface the same row more than once
                Some(rec) if !records.contains(&rec) => records.push(rec),
                Some(_) => {}
                None => trace!(?fields, "skipping non-data row"),
            }
        }
    }
    records
}

/// Scrape the lookup service for `zip`. Every call re-scrapes; nothing is cached
/// and nothing is retried.
#[instrument(level = "info", skip(client, base))]
pub async fn resolve_zip(
    client: &LegacyClient,
    base: &Url,
    zip: u32,
) -> Result<ZipLookup, ZipLookupError> {
    if zip > 99_999 {
        return Err(ZipLookupError::InvalidZip(zip));
    }
    let url = lookup_url(base, zip);
    let resp = client.fetch(&url).await?;
    if !resp.status.is_success() {
        return Err(ZipLookupError::Status {
            zip,
            status: resp.status,
        });
    }

    let html = String::from_utf8_lossy(&resp.body);
    let records = parse_zip_table(&html);
    debug!(rows = records.len(), "parsed lookup table");
    if records.is_empty() {
        return Err(ZipLookupError::NotFound(zip));
    }
    if let Some(first) = records.first() {
        info!(city = %first.city, state = %first.state, county = %first.county, "resolved");
    }
    Ok(ZipLookup {
        query: zip,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
<table><tr><td>Search again</td></tr></table>
<table border="1">
<tr><th>ZIP Code</th><th>City, State</th><th>County</th><th>Area Code</th></tr>
<tr><td>94105</td>
<td>San Francisco, CA</td>
<td>San Francisco</td>
<td>Bay Area</td></tr>
</table>
</body></html>"#;

    #[test]
    fn test_parse_cell_rows() {
        let records = parse_zip_table(PAGE);
        assert_eq!(
            records,
            vec![ZipRecord {
                zip: 94105,
                city: "San Francisco".into(),
                state: "CA".into(),
                county: "San Francisco".into(),
            }]
        );
    }

    #[test]
    fn test_parse_newline_joined_row() {
        let page = "<table><tr><td>ZIP</td></tr>\
            <tr><td>94105\nSan Francisco, CA\nSan Francisco\nBay Area</td></tr></table>";
        let records = parse_zip_table(page);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].city, "San Francisco");
        assert_eq!(records[0].state, "CA");
        assert_eq!(records[0].county, "San Francisco");
    }

    #[test]
    fn test_nested_tables_do_not_duplicate() {
        let page = format!("<table><tr><td>layout</td><td>{}</td></tr></table>", PAGE);
        assert_eq!(parse_zip_table(&page).len(), 1);
    }

    #[test]
    fn test_multi_city_zip_keeps_all_rows() {
        let page = "<table><tr><th>ZIP</th></tr>\
            <tr><td>10001</td><td>Elsewhere, NY</td><td>Kings</td><td>x</td></tr>\
            <tr><td>02139</td><td>Cambridge, MA</td><td>Middlesex</td><td>Boston</td></tr>\
            <tr><td>02139</td><td>Boston, MA</td><td>Suffolk</td><td>Boston</td></tr></table>";
        let lookup = ZipLookup {
            query: 2139,
            records: parse_zip_table(page),
        };
        assert_eq!(lookup.records.len(), 3);
        assert_eq!(lookup.primary().unwrap().city, "Cambridge");
        assert_eq!(lookup.location_for(AqiScale::County).as_deref(), Some("Middlesex"));
    }

    #[test]
    fn test_location_is_title_cased() {
        let lookup = ZipLookup {
            query: 94105,
            records: vec![ZipRecord {
                zip: 94105,
                city: "SAN FRANCISCO".into(),
                state: "CA".into(),
                county: "SAN FRANCISCO".into(),
            }],
        };
        assert_eq!(lookup.location_for(AqiScale::County).as_deref(), Some("San Francisco"));
        assert_eq!(lookup.location_for(AqiScale::City).as_deref(), Some("San Francisco"));
    }

    #[test]
    fn test_lookup_url() {
        let base = Url::parse("https://www.getzips.com/cgi-bin/ziplook.exe").unwrap();
        assert_eq!(
            lookup_url(&base, 2139).as_str(),
            "https://www.getzips.com/cgi-bin/ziplook.exe?What=1&Zip=02139&Submit=Look+It+Up"
        );
    }
}
