//! Unit inventory queries
//!
//! Two read operations, both cache-first with stale-on-error fallback:
//!
//! - [`UnitsService::list_units`]: the 200 most recently modified `Unit__c`
//!   records, each labelled with its unit type
//! - [`UnitsService::describe_units`]: the `Unit__c` field list
//!
//! Cache keys carry a version suffix; bump it whenever the envelope shape
//! changes so old entries are never served under the new shape.

mod envelope;
mod fallback;
mod labels;

pub use envelope::{DescribeEnvelope, FieldSummary, UnitsEnvelope, error_envelope, mark_cached};
pub use fallback::fetch_with_cache_fallback;
pub use labels::{UNIT_TYPE_FIELD, UNIT_TYPE_LABEL_FIELD, label_record, unit_type_label};

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::cache::TtlCache;
use crate::config::CacheConfig;
use crate::crm::{Fetcher, UpstreamResponse};
use crate::{Error, Result};

/// Cache key for the list envelope
pub const UNITS_LIST_KEY: &str = "units:list:v2";

/// Cache key for the describe envelope
pub const UNITS_DESCRIBE_KEY: &str = "units:describe:v1";

/// Rows returned by the list query
pub const UNITS_LIST_LIMIT: u32 = 200;

const UNIT_FIELDS: &[&str] = &[
    "Id",
    "Name",
    "Reference_Number__c",
    "RecordType.Name",
    "Unit_Type__c",
    "Beds__c",
    "Floor__c",
    "Unit_No__c",
    "Built_up_Area__c",
    "Status__c",
    "Price__c",
    "Community__c",
    "Building__r.Name",
    "LastModifiedDate",
];

/// SOQL for the list operation
#[must_use]
pub fn units_soql() -> String {
    format!(
        "SELECT {} FROM Unit__c ORDER BY LastModifiedDate DESC LIMIT {UNITS_LIST_LIMIT}",
        UNIT_FIELDS.join(", ")
    )
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default, rename = "totalSize")]
    total_size: u64,
    #[serde(default)]
    records: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    #[serde(default)]
    fields: Vec<FieldSummary>,
}

/// Query handlers over a [`Fetcher`] and a [`TtlCache`]
pub struct UnitsService {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<TtlCache>,
    list_ttl: Duration,
    describe_ttl: Duration,
    api_version: String,
}

impl UnitsService {
    /// Create the service
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<TtlCache>,
        cache_config: &CacheConfig,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            list_ttl: cache_config.default_ttl(),
            describe_ttl: cache_config.describe_ttl(),
            api_version: api_version.into(),
        }
    }

    /// Cache backing this service
    #[must_use]
    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    /// List recent units.
    ///
    /// # Errors
    ///
    /// Returns the upstream failure when nothing is cached to fall back on,
    /// or any credential/configuration error.
    pub async fn list_units(&self, force_refresh: bool) -> Result<Value> {
        fetch_with_cache_fallback(
            &self.cache,
            UNITS_LIST_KEY,
            self.list_ttl,
            force_refresh,
            || self.fetch_units(),
        )
        .await
    }

    /// Describe the unit object's fields.
    ///
    /// # Errors
    ///
    /// Same as [`UnitsService::list_units`].
    pub async fn describe_units(&self, force_refresh: bool) -> Result<Value> {
        fetch_with_cache_fallback(
            &self.cache,
            UNITS_DESCRIBE_KEY,
            self.describe_ttl,
            force_refresh,
            || self.fetch_describe(),
        )
        .await
    }

    async fn fetch_units(&self) -> Result<Value> {
        let path = format!("/services/data/{}/query", self.api_version);
        let soql = units_soql();
        let response = self
            .fetcher
            .authenticated_get(&path, &[("q", soql.as_str())])
            .await?;
        let data: QueryResponse = ensure_ok(response)?.json()?;

        let records: Vec<Value> = data
            .records
            .into_iter()
            .map(|mut record| {
                label_record(&mut record);
                Value::Object(record)
            })
            .collect();

        info!(
            total_size = data.total_size,
            returned = records.len(),
            "Fetched units"
        );

        let envelope = UnitsEnvelope {
            ok: true,
            from_cache: false,
            cache_ttl: self.list_ttl.as_secs(),
            total_size: data.total_size,
            records,
        };
        Ok(serde_json::to_value(envelope)?)
    }

    async fn fetch_describe(&self) -> Result<Value> {
        let path = format!(
            "/services/data/{}/sobjects/Unit__c/describe",
            self.api_version
        );
        let response = self.fetcher.authenticated_get(&path, &[]).await?;
        let data: DescribeResponse = ensure_ok(response)?.json()?;

        info!(fields = data.fields.len(), "Fetched unit describe");

        let envelope = DescribeEnvelope {
            ok: true,
            from_cache: false,
            cache_ttl: self.describe_ttl.as_secs(),
            fields: data.fields,
        };
        Ok(serde_json::to_value(envelope)?)
    }
}

/// Turn any non-200 answer into [`Error::UpstreamFetch`]
fn ensure_ok(response: UpstreamResponse) -> Result<UpstreamResponse> {
    if response.is_ok() {
        Ok(response)
    } else {
        Err(Error::UpstreamFetch {
            status: response.status.as_u16(),
            body: response.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Upstream that replays a fixed script and records what was asked
    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<UpstreamResponse>>>,
        requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<UpstreamResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn authenticated_get(
            &self,
            path: &str,
            query: &[(&str, &str)],
        ) -> Result<UpstreamResponse> {
            self.requests.lock().push((
                path.to_string(),
                query
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ));
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Internal("script exhausted".to_string())))
        }
    }

    fn ok(body: Value) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse::new(StatusCode::OK, body.to_string()))
    }

    fn status(code: StatusCode, body: &str) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse::new(code, body))
    }

    fn query_body() -> Value {
        json!({
            "totalSize": 2,
            "done": true,
            "records": [
                {"Id": "a01", "Name": "U-101", "Unit_Type__c": "AP"},
                {"Id": "a02", "Name": "U-102", "Unit_Type__c": "ZZ"}
            ]
        })
    }

    fn service(fetcher: Arc<ScriptedFetcher>, ttl_seconds: u64) -> UnitsService {
        UnitsService::new(
            fetcher,
            Arc::new(TtlCache::new()),
            &CacheConfig { ttl_seconds },
            "v61.0",
        )
    }

    #[test]
    fn soql_orders_and_limits() {
        let soql = units_soql();
        assert!(soql.starts_with("SELECT Id, Name, Reference_Number__c"));
        assert!(soql.ends_with("FROM Unit__c ORDER BY LastModifiedDate DESC LIMIT 200"));
        assert!(soql.contains("Building__r.Name"));
    }

    #[tokio::test]
    async fn list_units_builds_labelled_envelope() {
        let fetcher = ScriptedFetcher::new(vec![ok(query_body())]);
        let svc = service(Arc::clone(&fetcher), 60);

        let value = svc.list_units(false).await.unwrap();
        let envelope: UnitsEnvelope = serde_json::from_value(value).unwrap();

        assert!(envelope.ok);
        assert!(!envelope.from_cache);
        assert_eq!(envelope.cache_ttl, 60);
        assert_eq!(envelope.total_size, 2);
        assert_eq!(envelope.records[0]["Unit_Type_Label"], "Apartment");
        assert_eq!(envelope.records[1]["Unit_Type_Label"], "ZZ");

        let requests = fetcher.requests.lock();
        assert_eq!(requests[0].0, "/services/data/v61.0/query");
        assert_eq!(requests[0].1, vec![("q".to_string(), units_soql())]);
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_served_from_cache() {
        let fetcher = ScriptedFetcher::new(vec![ok(query_body())]);
        let svc = service(Arc::clone(&fetcher), 60);

        let first = svc.list_units(false).await.unwrap();
        let second = svc.list_units(false).await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(first["fromCache"], false);
        assert_eq!(second["fromCache"], true);
        assert_eq!(mark_cached(&first), second);
    }

    #[tokio::test]
    async fn force_refresh_goes_upstream() {
        let fetcher = ScriptedFetcher::new(vec![ok(query_body()), ok(query_body())]);
        let svc = service(Arc::clone(&fetcher), 60);

        svc.list_units(false).await.unwrap();
        let forced = svc.list_units(true).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(forced["fromCache"], false);
    }

    #[tokio::test]
    async fn upstream_error_falls_back_to_expired_entry() {
        let fetcher = ScriptedFetcher::new(vec![
            ok(query_body()),
            status(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        ]);
        let svc = service(Arc::clone(&fetcher), 0);

        let first = svc.list_units(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = svc.list_units(false).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(second["ok"], true);
        assert_eq!(second["fromCache"], true);
        assert_eq!(second["records"], first["records"]);
    }

    #[tokio::test]
    async fn upstream_error_without_cache_surfaces_status_and_body() {
        let fetcher = ScriptedFetcher::new(vec![status(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"[{"errorCode":"SERVER_UNAVAILABLE"}]"#,
        )]);
        let svc = service(fetcher, 60);

        let err = svc.list_units(false).await.unwrap_err();
        match err {
            Error::UpstreamFetch { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, r#"[{"errorCode":"SERVER_UNAVAILABLE"}]"#);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn persistent_unauthorized_surfaces_as_401() {
        let fetcher = ScriptedFetcher::new(vec![status(
            StatusCode::UNAUTHORIZED,
            r#"[{"errorCode":"INVALID_SESSION_ID"}]"#,
        )]);
        let svc = service(fetcher, 60);

        let err = svc.list_units(false).await.unwrap_err();
        assert_eq!(err.http_status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn credential_errors_bypass_fallback() {
        let fetcher = ScriptedFetcher::new(vec![
            ok(query_body()),
            Err(Error::UpstreamAuth {
                status: 400,
                body: "invalid_grant".to_string(),
            }),
        ]);
        let svc = service(Arc::clone(&fetcher), 0);

        svc.list_units(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let err = svc.list_units(false).await.unwrap_err();

        assert!(matches!(err, Error::UpstreamAuth { status: 400, .. }));
    }

    #[tokio::test]
    async fn describe_projects_fields_with_long_ttl() {
        let fetcher = ScriptedFetcher::new(vec![ok(json!({
            "name": "Unit__c",
            "fields": [
                {"name": "Id", "label": "Record ID", "type": "id", "length": 18},
                {"name": "Price__c", "label": "Price", "type": "currency", "precision": 18}
            ]
        }))]);
        let svc = service(Arc::clone(&fetcher), 60);

        let value = svc.describe_units(false).await.unwrap();

        assert_eq!(
            value,
            json!({
                "ok": true,
                "fromCache": false,
                "cacheTtl": 300,
                "fields": [
                    {"name": "Id", "label": "Record ID", "type": "id"},
                    {"name": "Price__c", "label": "Price", "type": "currency"}
                ]
            })
        );
        assert_eq!(
            fetcher.requests.lock()[0].0,
            "/services/data/v61.0/sobjects/Unit__c/describe"
        );
    }

    #[tokio::test]
    async fn list_and_describe_use_separate_keys() {
        let fetcher = ScriptedFetcher::new(vec![
            ok(query_body()),
            ok(json!({"fields": []})),
        ]);
        let svc = service(Arc::clone(&fetcher), 60);

        svc.list_units(false).await.unwrap();
        svc.describe_units(false).await.unwrap();
        svc.list_units(false).await.unwrap();
        svc.describe_units(false).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(svc.cache().stats().size, 2);
    }
}
