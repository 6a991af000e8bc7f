use log::{debug, info};
use serde_json::{Map, Value};

use crate::{
    alvys::{auth::Token, entity::Entity, retry::RetryPolicy, transport::Transport},
    error::IngestError,
    interval::week::TimeWindow,
};

/// One page of raw records.
pub type Page = Vec<Value>;

/// Fetches entity records page by page from the search endpoints.
pub struct Exporter<'a, T: Transport> {
    transport: &'a T,
    api_base: String,
    page_size: u32,
    retry: RetryPolicy,
}

impl<'a, T: Transport> Exporter<'a, T> {
    pub fn new(transport: &'a T, api_base: &str, page_size: u32, retry: RetryPolicy) -> Self {
        Exporter {
            transport,
            api_base: api_base.trim_end_matches('/').to_string(),
            page_size,
            retry,
        }
    }

    pub fn search_url(&self, entity: Entity) -> String {
        format!("{}/api/p/v1/{}/search", self.api_base, entity)
    }

    /// Lazy sequence of pages.  Nothing is requested until the first call
    /// to `next`.
    pub fn pages<'t>(
        &'t self,
        scac: &str,
        token: &'t Token,
        entity: Entity,
        window: &TimeWindow,
    ) -> Pages<'t, 'a, T> {
        Pages {
            exporter: self,
            scac: scac.to_string(),
            token,
            entity,
            filter: entity.search_filter(window),
            page: 0,
            done: false,
        }
    }

    /// All records of an entity.  Fails on the first page that can't be
    /// fetched, so a partial export is never returned.
    pub fn export(
        &self,
        scac: &str,
        token: &Token,
        entity: Entity,
        window: &TimeWindow,
    ) -> Result<Vec<Value>, IngestError> {
        let mut records: Vec<Value> = Vec::new();
        let mut pages = self.pages(scac, token, entity, window);
        for page in pages.by_ref() {
            records.extend(page?);
        }
        info!(
            "[{}] {}: exported {} records in {} pages",
            scac,
            entity,
            records.len(),
            pages.page()
        );
        Ok(records)
    }

    /// Request a single page.  `None` means the API reports nothing past
    /// this page (HTTP 404).
    pub fn fetch_page(
        &self,
        scac: &str,
        token: &Token,
        entity: Entity,
        filter: &Map<String, Value>,
        page: u32,
    ) -> Result<Option<Page>, IngestError> {
        let export_error = |message: String| IngestError::Export {
            entity: entity.to_string(),
            message,
        };
        let mut body = filter.clone();
        body.insert("page".into(), Value::from(page));
        body.insert("pageSize".into(), Value::from(self.page_size));
        let body = Value::Object(body);
        let url = self.search_url(entity);

        let res = self
            .retry
            .send(&format!("[{}] {} page {}", scac, entity, page), || {
                self.transport.post_json(&url, &token.value, &body)
            })
            .map_err(|e| export_error(e.to_string()))?;
        if res.status == 404 {
            debug!("[{}] {}: page {} returned 404, end of data", scac, entity, page);
            return Ok(None);
        }
        if !res.is_success() {
            return Err(export_error(format!(
                "page {}: HTTP {} {}",
                page,
                res.status,
                res.snippet()
            )));
        }

        let malformed = |message: String| IngestError::MalformedPage {
            entity: entity.to_string(),
            page,
            message,
        };
        let json: Value =
            serde_json::from_str(&res.body).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
        let items = match json.get("Items").or_else(|| json.get("items")) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(malformed(format!(
                    "items is not an array but {}",
                    json_type(other)
                )))
            }
        };
        debug!(
            "[{}] {}: page {} has {} records",
            scac,
            entity,
            page,
            items.len()
        );
        Ok(Some(items))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Iterator over the pages of one tenant/entity export.  After an error the
/// iterator stops; [`Pages::restart`] re-requests the page that failed.
pub struct Pages<'t, 'a, T: Transport> {
    exporter: &'t Exporter<'a, T>,
    scac: String,
    token: &'t Token,
    entity: Entity,
    filter: Map<String, Value>,
    page: u32,
    done: bool,
}

impl<T: Transport> Pages<'_, '_, T> {
    /// Index of the next page to request, which is also the number of pages
    /// delivered so far.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn restart(&mut self) {
        self.done = false;
    }
}

impl<T: Transport> Iterator for Pages<'_, '_, T> {
    type Item = Result<Page, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.exporter.fetch_page(
            &self.scac,
            self.token,
            self.entity,
            &self.filter,
            self.page,
        ) {
            Ok(Some(items)) if !items.is_empty() => {
                if (items.len() as u64) < u64::from(self.exporter.page_size) {
                    self.done = true;
                }
                self.page += 1;
                Some(Ok(items))
            }
            Ok(_) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, time::Duration};

    use jiff::Timestamp;
    use serde_json::json;

    use super::*;
    use crate::{
        alvys::transport::{fake::FakeTransport, HttpResponse, TransportError},
        interval::week::compute_week,
    };

    fn token() -> Token {
        Token {
            value: "tok".into(),
            expires_at: Timestamp::MAX,
        }
    }

    fn window() -> TimeWindow {
        compute_week("2024-01-17T18:30:00Z".parse().unwrap(), "America/Denver").unwrap()
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn records(from: usize, n: usize) -> Value {
        Value::Array((from..from + n).map(|i| json!({"Id": format!("L{}", i)})).collect())
    }

    #[test]
    fn paginates_until_short_page() -> Result<(), Box<dyn Error>> {
        let transport = FakeTransport::new();
        transport
            .ok("loads/search", json!({"Items": records(0, 3)}))
            .ok("loads/search", json!({"items": records(3, 3)}))
            .ok("loads/search", json!({"Items": records(6, 1)}));
        let exporter = Exporter::new(&transport, "https://api.test", 3, fast());
        let out = exporter.export("ABCD", &token(), Entity::Loads, &window())?;
        assert_eq!(out.len(), 7);
        assert_eq!(out[6]["Id"], "L6");

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].url, "https://api.test/api/p/v1/loads/search");
        assert_eq!(requests[0].bearer.as_deref(), Some("tok"));
        let body = requests[2].json.clone().unwrap_or_default();
        assert_eq!(body["page"], 2);
        assert_eq!(body["pageSize"], 3);
        assert_eq!(body["updatedAtRange"]["start"], "2024-01-07T07:00:00.000Z");
        Ok(())
    }

    #[test]
    fn empty_page_and_404_end_pagination() -> Result<(), Box<dyn Error>> {
        let transport = FakeTransport::new();
        transport
            .ok("drivers/search", json!({"Items": records(0, 2)}))
            .ok("drivers/search", json!({"Items": []}));
        let exporter = Exporter::new(&transport, "https://api.test", 2, fast());
        let out = exporter.export("ABCD", &token(), Entity::Drivers, &window())?;
        assert_eq!(out.len(), 2);
        assert!(!transport.requests()[0]
            .json
            .clone()
            .unwrap_or_default()
            .as_object()
            .map_or(false, |m| m.contains_key("updatedAtRange")));

        // nothing scripted for trips past the first page: the fake answers 404
        transport.ok("trips/search", json!({"Items": records(0, 2)}));
        let out = exporter.export("ABCD", &token(), Entity::Trips, &window())?;
        assert_eq!(out.len(), 2);
        assert_eq!(transport.requests_to("trips/search").len(), 2);
        Ok(())
    }

    #[test]
    fn retries_are_transparent() -> Result<(), Box<dyn Error>> {
        let transport = FakeTransport::new();
        transport
            .ok("loads/search", json!({"Items": records(0, 2)}))
            .on("loads/search", Err(TransportError::Timeout("slow".into())))
            .on("loads/search", Ok(HttpResponse::new(500, "oops")))
            .ok("loads/search", json!({"Items": records(2, 1)}));
        let exporter = Exporter::new(&transport, "https://api.test", 2, fast());
        let out = exporter.export("ABCD", &token(), Entity::Loads, &window())?;
        let ids: Vec<&str> = out.iter().filter_map(|r| r["Id"].as_str()).collect();
        assert_eq!(ids, vec!["L0", "L1", "L2"]);
        assert_eq!(transport.requests().len(), 4);
        Ok(())
    }

    #[test]
    fn retry_after_is_honoured() -> Result<(), Box<dyn Error>> {
        let transport = FakeTransport::new();
        transport
            .on(
                "loads/search",
                Ok(HttpResponse {
                    status: 429,
                    retry_after: Some(Duration::from_secs(0)),
                    body: "slow down".into(),
                }),
            )
            .ok("loads/search", json!({"Items": records(0, 1)}));
        let exporter = Exporter::new(&transport, "https://api.test", 2, fast());
        let out = exporter.export("ABCD", &token(), Entity::Loads, &window())?;
        assert_eq!(out.len(), 1);
        Ok(())
    }

    #[test]
    fn unauthorized_page_is_not_retried() {
        let transport = FakeTransport::new();
        transport.on("loads/search", Ok(HttpResponse::new(401, "expired")));
        let exporter = Exporter::new(&transport, "https://api.test", 2, fast());
        let res = exporter.export("ABCD", &token(), Entity::Loads, &window());
        assert!(matches!(res, Err(IngestError::Export { .. })));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn retry_exhaustion_fails_the_export() {
        let transport = FakeTransport::new();
        for _ in 0..4 {
            transport.on("loads/search", Ok(HttpResponse::new(503, "down")));
        }
        let exporter = Exporter::new(&transport, "https://api.test", 2, fast());
        let res = exporter.export("ABCD", &token(), Entity::Loads, &window());
        assert!(matches!(res, Err(IngestError::Export { .. })));
        assert_eq!(transport.requests().len(), 4);
    }

    #[test]
    fn malformed_pages() {
        let transport = FakeTransport::new();
        transport
            .on("loads/search", Ok(HttpResponse::new(200, "<html>")))
            .ok("trips/search", json!({"Items": {"Id": "T1"}}));
        let exporter = Exporter::new(&transport, "https://api.test", 2, fast());
        let res = exporter.export("ABCD", &token(), Entity::Loads, &window());
        assert!(matches!(res, Err(IngestError::MalformedPage { page: 0, .. })));
        let res = exporter.export("ABCD", &token(), Entity::Trips, &window());
        assert!(matches!(res, Err(IngestError::MalformedPage { .. })));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn restart_requests_the_same_page() -> Result<(), Box<dyn Error>> {
        let transport = FakeTransport::new();
        transport
            .ok("loads/search", json!({"Items": records(0, 2)}))
            .on("loads/search", Ok(HttpResponse::new(403, "nope")))
            .ok("loads/search", json!({"Items": records(2, 1)}));
        let exporter = Exporter::new(&transport, "https://api.test", 2, fast());
        let token = token();
        let window = window();
        let mut pages = exporter.pages("ABCD", &token, Entity::Loads, &window);
        assert_eq!(pages.next().transpose()?.map(|p| p.len()), Some(2));
        assert!(matches!(pages.next(), Some(Err(IngestError::Export { .. }))));
        assert!(pages.next().is_none());
        pages.restart();
        assert_eq!(pages.next().transpose()?.map(|p| p.len()), Some(1));
        assert!(pages.next().is_none());

        let pages_requested: Vec<Value> = transport
            .requests()
            .iter()
            .filter_map(|r| r.json.as_ref().map(|b| b["page"].clone()))
            .collect();
        assert_eq!(pages_requested, vec![json!(0), json!(1), json!(1)]);
        Ok(())
    }

    #[ignore]
    #[test]
    fn live_export() -> Result<(), Box<dyn Error>> {
        use crate::{
            alvys::{auth::TokenManager, transport::ReqwestTransport},
            config::{load_env_file, Config},
        };
        env_logger::builder().is_test(true).try_init().ok();
        load_env_file("test")?;
        let config = Config::from_env()?;
        let tenant = config
            .tenant_override
            .clone()
            .ok_or("set ALVYS_TENANT_ID and friends in .env/test.env")?;
        let transport = ReqwestTransport::new(config.http_timeout)?;
        let token =
            TokenManager::new(&transport, &config.api_base, config.retry.clone()).acquire_token(&tenant)?;
        let exporter = Exporter::new(&transport, &config.api_base, config.page_size, config.retry);
        let window = compute_week(Timestamp::now(), &config.timezone_name)?;
        let out = exporter.export("TEST", &token, Entity::Drivers, &window)?;
        println!("{} drivers", out.len());
        Ok(())
    }
}
