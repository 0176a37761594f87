use crate::traits::FormDriver;
use crate::{CaseRecord, ProbeRequest, SearchResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Drives a form gateway that takes the assignment as query parameters and
/// answers with `{ "records": [...] }`.
///
/// A rejected filter is reported as a 4xx carrying `{ "rejected_field": "<field>" }`,
/// which becomes a fatal result pruned at that field's dimension.
pub struct HttpFormDriver {
    client: Client,
    endpoint: String,
    name_param: String,
}

#[derive(Debug, Deserialize)]
struct RecordsEnvelope {
    #[serde(default)]
    records: Vec<CaseRecord>,
}

impl HttpFormDriver {
    pub fn new(endpoint: impl Into<String>, name_param: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            name_param: name_param.into(),
        }
    }

    pub fn probe_url(&self, request: &ProbeRequest) -> Result<Url, url::ParseError> {
        let pairs = std::iter::once((self.name_param.as_str(), request.search_name.as_str()))
            .chain(
                request
                    .params
                    .iter()
                    .map(|param| (param.field.as_str(), param.value.as_str())),
            );
        Url::parse_with_params(&self.endpoint, pairs)
    }
}

#[async_trait]
impl FormDriver for HttpFormDriver {
    async fn probe(&mut self, request: &ProbeRequest) -> SearchResult {
        let url = match self.probe_url(request) {
            Ok(url) => url,
            Err(error) => return SearchResult::fatal(format!("url parse error: {error}")),
        };

        debug!(url = %url, "probing form gateway");
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(error) => return classify_transport_error(&error),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => return classify_transport_error(&error),
        };

        if status.is_success() {
            return parse_records(&body);
        }

        classify_rejection(status, &body, request)
    }
}

fn classify_transport_error(error: &reqwest::Error) -> SearchResult {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        SearchResult::Transient(format!("http error: {error}"))
    } else {
        SearchResult::fatal(format!("http error: {error}"))
    }
}

pub(crate) fn parse_records(body: &str) -> SearchResult {
    match serde_json::from_str::<RecordsEnvelope>(body) {
        Ok(envelope) if envelope.records.is_empty() => SearchResult::Empty,
        Ok(envelope) => SearchResult::Matches(envelope.records),
        Err(error) => SearchResult::fatal(format!("unexpected response structure: {error}")),
    }
}

pub(crate) fn classify_rejection(
    status: StatusCode,
    body: &str,
    request: &ProbeRequest,
) -> SearchResult {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return SearchResult::Transient(format!("form gateway answered {status}"));
    }

    let rejected_depth = serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|value| value.pointer("/rejected_field"))
        .and_then(Value::as_str)
        .and_then(|field| request.params.iter().position(|param| param.field == field));

    SearchResult::Fatal {
        cause: format!("form gateway rejected the search with {status}"),
        depth: rejected_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Assignment, FilterParam};

    fn request() -> ProbeRequest {
        ProbeRequest {
            search_name: "ANA PEREZ".to_string(),
            assignment: Assignment::new(vec![0, 1]),
            params: vec![
                FilterParam {
                    field: "department".to_string(),
                    value: "BOGOTA".to_string(),
                },
                FilterParam {
                    field: "city".to_string(),
                    value: "02".to_string(),
                },
            ],
        }
    }

    #[test]
    fn probe_url_carries_name_and_filters() -> Result<(), Box<dyn std::error::Error>> {
        let driver = HttpFormDriver::new("http://localhost:8080/lookup?kind=natural", "name");
        let url = driver.probe_url(&request())?;

        assert_eq!(
            url.as_str(),
            "http://localhost:8080/lookup?kind=natural&name=ANA+PEREZ&department=BOGOTA&city=02"
        );
        Ok(())
    }

    #[test]
    fn records_body_becomes_matches_or_empty() {
        let matches = parse_records(r#"{"records":[{"case_id":"123","office":"Juzgado 1"}]}"#);
        assert_eq!(
            matches,
            SearchResult::Matches(vec![CaseRecord {
                case_id: "123".to_string(),
                office: Some("Juzgado 1".to_string()),
                ..CaseRecord::default()
            }])
        );

        assert_eq!(parse_records(r#"{"records":[]}"#), SearchResult::Empty);
        assert!(matches!(
            parse_records("<html>maintenance</html>"),
            SearchResult::Fatal { depth: None, .. }
        ));
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::BAD_GATEWAY,
        ] {
            assert!(matches!(
                classify_rejection(status, "", &request()),
                SearchResult::Transient(_)
            ));
        }
    }

    #[test]
    fn rejected_field_maps_to_prune_depth() {
        let result = classify_rejection(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"rejected_field":"city"}"#,
            &request(),
        );
        assert!(matches!(result, SearchResult::Fatal { depth: Some(1), .. }));

        let result = classify_rejection(StatusCode::BAD_REQUEST, "bad", &request());
        assert!(matches!(result, SearchResult::Fatal { depth: None, .. }));
    }
}
