//! DNS-over-HTTPS lookup of the TXT records that list fallback domains.
use crate::{Error, Result};

/// Wire-format TXT query for `featureassets.org`.
pub(crate) const FEATURE_ASSETS_DNS_QUERY: [u8; 35] = [
    0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x0d, 0x66, 0x65, 0x61, //
    0x74, 0x75, 0x72, 0x65, 0x61, 0x73, 0x73, 0x65, //
    0x74, 0x73, 0x03, 0x6f, 0x72, 0x67, 0x00, 0x00, //
    0x10, 0x00, 0x01,
];

pub const DNS_QUERY_ENDPOINT: &str = "https://cloudflare-dns.com/dns-query";

const DOMAIN_CHARS: [u8; 3] = [b'i', b'e', b'd'];
const MAX_START_LOOKUP: usize = 200;
const DNS_CONTENT_TYPE: &str = "application/dns-message";

/// POST the TXT query to `dns_url` and parse the records out of the answer.
pub(crate) async fn fetch_txt_records(http: &reqwest::Client, dns_url: &str) -> Result<Vec<String>> {
    log::debug!(target: "statsig", "querying fallback domains over DNS");
    let response = http
        .post(dns_url)
        .header(reqwest::header::CONTENT_TYPE, DNS_CONTENT_TYPE)
        .header(reqwest::header::ACCEPT, DNS_CONTENT_TYPE)
        .body(FEATURE_ASSETS_DNS_QUERY.to_vec())
        .send()
        .await?;
    if response.status() != reqwest::StatusCode::OK {
        return Err(Error::DnsQueryFailed("failed to fetch TXT records from DNS"));
    }
    let body = response.bytes().await?;
    parse_dns_response(&body)
}

/// Extract comma-separated `key=value` records from a DNS answer.
///
/// The records start at the first `=` within the first bytes of the message that follows one of
/// the known domain keys.
pub(crate) fn parse_dns_response(data: &[u8]) -> Result<Vec<String>> {
    let lookup_length = data.len().min(MAX_START_LOOKUP);
    if lookup_length == 0 {
        return Err(Error::DnsQueryFailed("empty response from DNS query"));
    }

    let start = (1..lookup_length)
        .find(|&index| data[index] == b'=' && DOMAIN_CHARS.contains(&data[index - 1]))
        .map(|index| index - 1)
        .ok_or(Error::DnsQueryFailed("failed to parse TXT records from DNS"))?;

    let records = std::str::from_utf8(&data[start..])
        .map_err(|_| Error::DnsQueryFailed("failed to decode DNS response"))?;
    Ok(records.split(',').map(str::to_owned).collect())
}
