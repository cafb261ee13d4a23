//! Vector index backed by the Qdrant REST API.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Body, Method, Request, StatusCode, Uri};
use memo_adapters::http_client::{
    BufferedResponse, HyperClient, build_https_client, sanitize_base_url, send,
};
use memo_primitives::{AgentId, MemoryId, PointId, collection_name};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::EmbeddingVector;
use crate::error::Backend;
use crate::vector_index::{PointRef, ScoredPoint, VectorIndex, VectorPoint};
use crate::{MemoryError, MemoryResult};

/// Qdrant instance used when none is configured.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333/";

const SCROLL_PAGE: usize = 256;

fn index_error(err: impl fmt::Display) -> MemoryError {
    MemoryError::upstream(Backend::VectorIndex, err.to_string())
}

/// Connection settings for [`QdrantIndex`].
#[derive(Clone)]
pub struct QdrantConfig {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl fmt::Debug for QdrantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl QdrantConfig {
    /// Targets the Qdrant instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidArgument`] if the URL is malformed.
    pub fn new(base_url: impl AsRef<str>) -> MemoryResult<Self> {
        let base_url = sanitize_base_url(base_url.as_ref(), "Qdrant")
            .map_err(|err| MemoryError::invalid_argument(err.to_string()))?;
        Ok(Self {
            base_url,
            api_key: None,
            timeout: Duration::from_secs(60),
        })
    }

    /// Sends `api-key` with every request.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Qdrant client speaking the REST API. Writes use `wait=true`, so upserted
/// points are searchable once a call returns.
pub struct QdrantIndex {
    client: HyperClient,
    config: QdrantConfig,
}

impl fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QdrantIndex {
    /// Creates a client for the configured instance.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Upstream`] if the HTTP client cannot be built.
    pub fn new(config: QdrantConfig) -> MemoryResult<Self> {
        Ok(Self {
            client: build_https_client().map_err(index_error)?,
            config,
        })
    }

    fn uri(&self, agent: AgentId, suffix: &str) -> MemoryResult<Uri> {
        format!(
            "{}collections/{}{suffix}",
            self.config.base_url,
            collection_name(agent)
        )
        .parse::<Uri>()
        .map_err(|err| index_error(format!("invalid Qdrant URI: {err}")))
    }

    async fn call<B: Serialize + Sync>(
        &self,
        method: Method,
        uri: Uri,
        body: Option<&B>,
    ) -> MemoryResult<BufferedResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|err| MemoryError::invalid_argument(format!("invalid Qdrant api key: {err}")))?;
            builder = builder.header("api-key", value);
        }

        let request = match body {
            Some(body) => {
                let bytes = serde_json::to_vec(body)
                    .map_err(|err| index_error(format!("failed to encode Qdrant request: {err}")))?;
                builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(bytes))
            }
            None => builder.body(Body::empty()),
        }
        .map_err(|err| index_error(format!("failed to build Qdrant request: {err}")))?;

        send(&self.client, request, self.config.timeout, "Qdrant")
            .await
            .map_err(index_error)
    }

    async fn call_ok<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        uri: Uri,
        body: &B,
    ) -> MemoryResult<T> {
        let response = self.call(method, uri, Some(body)).await?;
        decode_result(&response)
    }
}

fn decode_result<T: DeserializeOwned>(response: &BufferedResponse) -> MemoryResult<T> {
    if !response.status.is_success() {
        return Err(index_error(format!(
            "Qdrant returned {}: {}",
            response.status,
            response.body_text()
        )));
    }
    serde_json::from_slice::<QdrantResponse<T>>(&response.body)
        .map(|parsed| parsed.result)
        .map_err(|err| index_error(format!("failed to decode Qdrant response: {err}")))
}

fn memory_id(point_id: PointId, payload: Option<Payload>) -> MemoryResult<MemoryId> {
    payload
        .map(|payload| payload.memory_id)
        .ok_or_else(|| index_error(format!("point {point_id} carries no memory_id payload")))
}

/// An existing collection is only reusable if its single unnamed vector has
/// the configured width.
fn ensure_vector_size(agent: AgentId, info: &CollectionInfo, dimensions: usize) -> MemoryResult<()> {
    let name = collection_name(agent);
    let size = info
        .config
        .params
        .vectors
        .get("size")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| index_error(format!("collection {name} does not use a single unnamed vector")))?;
    if usize::try_from(size).ok() != Some(dimensions) {
        return Err(index_error(format!(
            "collection {name} has vector size {size}, expected {dimensions}"
        )));
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn create_collection(&self, agent: AgentId, dimensions: usize) -> MemoryResult<()> {
        let body = CreateCollection {
            vectors: VectorParams {
                size: dimensions,
                distance: "Cosine",
            },
        };
        let response = self
            .call(Method::PUT, self.uri(agent, "")?, Some(&body))
            .await?;

        let exists = response.status == StatusCode::CONFLICT
            || (response.status == StatusCode::BAD_REQUEST
                && response.body_text().contains("already exists"));
        if exists {
            let response = self
                .call::<()>(Method::GET, self.uri(agent, "")?, None)
                .await?;
            let info: CollectionInfo = decode_result(&response)?;
            return ensure_vector_size(agent, &info, dimensions);
        }
        decode_result::<serde_json::Value>(&response)?;
        debug!(agent_id = %agent, dimensions, "qdrant collection created");
        Ok(())
    }

    async fn drop_collection(&self, agent: AgentId) -> MemoryResult<()> {
        let response = self
            .call::<()>(Method::DELETE, self.uri(agent, "")?, None)
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        decode_result::<serde_json::Value>(&response)?;
        debug!(agent_id = %agent, "qdrant collection dropped");
        Ok(())
    }

    async fn upsert(&self, agent: AgentId, points: Vec<VectorPoint>) -> MemoryResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = UpsertPoints {
            points: points.iter().map(WirePoint::from).collect(),
        };
        self.call_ok::<_, serde_json::Value>(Method::PUT, self.uri(agent, "/points?wait=true")?, &body)
            .await?;
        Ok(())
    }

    async fn delete(&self, agent: AgentId, ids: &[PointId]) -> MemoryResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = DeletePoints { points: ids };
        self.call_ok::<_, serde_json::Value>(
            Method::POST,
            self.uri(agent, "/points/delete?wait=true")?,
            &body,
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        agent: AgentId,
        vector: &EmbeddingVector,
        limit: NonZeroUsize,
    ) -> MemoryResult<Vec<ScoredPoint>> {
        let body = SearchRequest {
            vector: vector.as_slice(),
            limit: limit.get(),
            with_payload: true,
            with_vector: false,
        };
        let hits: Vec<Hit> = self
            .call_ok(Method::POST, self.uri(agent, "/points/search")?, &body)
            .await?;

        hits.into_iter()
            .map(|hit| {
                Ok(ScoredPoint {
                    point_id: hit.id,
                    memory_id: memory_id(hit.id, hit.payload)?,
                    score: hit.score,
                })
            })
            .collect()
    }

    async fn points(&self, agent: AgentId) -> MemoryResult<Vec<PointRef>> {
        let mut refs = Vec::new();
        let mut offset = None;
        loop {
            let body = ScrollRequest {
                limit: SCROLL_PAGE,
                offset,
                with_payload: true,
                with_vector: false,
            };
            let page: ScrollPage = self
                .call_ok(Method::POST, self.uri(agent, "/points/scroll")?, &body)
                .await?;

            for point in page.points {
                refs.push(PointRef {
                    point_id: point.id,
                    memory_id: memory_id(point.id, point.payload)?,
                });
            }
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => return Ok(refs),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Payload {
    memory_id: MemoryId,
}

#[derive(Debug, Serialize)]
struct WirePoint<'a> {
    id: PointId,
    vector: &'a [f32],
    payload: Payload,
}

impl<'a> From<&'a VectorPoint> for WirePoint<'a> {
    fn from(point: &'a VectorPoint) -> Self {
        Self {
            id: point.id(),
            vector: point.vector().as_slice(),
            payload: Payload {
                memory_id: point.memory_id(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertPoints<'a> {
    points: Vec<WirePoint<'a>>,
}

#[derive(Debug, Serialize)]
struct DeletePoints<'a> {
    points: &'a [PointId],
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Debug, Deserialize)]
struct Hit {
    id: PointId,
    score: f32,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Serialize)]
struct ScrollRequest {
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<PointId>,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    points: Vec<ScrolledPoint>,
    #[serde(default)]
    next_page_offset: Option<PointId>,
}

#[derive(Debug, Deserialize)]
struct ScrolledPoint {
    id: PointId,
    #[serde(default)]
    payload: Option<Payload>,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use hyper::header::HeaderMap;

    use super::*;

    fn index() -> QdrantIndex {
        QdrantIndex::new(QdrantConfig::new("http://localhost:6333").unwrap()).unwrap()
    }

    fn response(status: StatusCode, body: &str) -> BufferedResponse {
        BufferedResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    #[test]
    fn uris_are_namespaced_by_collection() {
        let agent = AgentId::random();
        let uri = index().uri(agent, "/points/search").unwrap();
        assert_eq!(
            uri.path(),
            format!("/collections/{}/points/search", collection_name(agent))
        );

        let uri = index().uri(agent, "/points?wait=true").unwrap();
        assert_eq!(uri.query(), Some("wait=true"));
    }

    #[test]
    fn config_rejects_urls_without_scheme() {
        let err = QdrantConfig::new("localhost:6333").expect_err("missing scheme");
        assert!(matches!(err, MemoryError::InvalidArgument { .. }));
    }

    #[test]
    fn upsert_body_carries_memory_id_payload() {
        let point = VectorPoint::new(
            PointId::generate(),
            EmbeddingVector::new(vec![0.25, 0.75]).unwrap(),
            MemoryId::generate(),
        );
        let body = serde_json::to_value(UpsertPoints {
            points: vec![WirePoint::from(&point)],
        })
        .unwrap();

        assert_eq!(body["points"][0]["id"], point.id().to_string());
        assert_eq!(body["points"][0]["vector"][1], 0.75);
        assert_eq!(
            body["points"][0]["payload"]["memory_id"],
            point.memory_id().to_string()
        );
    }

    #[test]
    fn search_hits_decode_in_rank_order() {
        let first = (PointId::generate(), MemoryId::generate());
        let second = (PointId::generate(), MemoryId::generate());
        let json = format!(
            r#"{{"result":[
                {{"id":"{}","version":3,"score":0.91,"payload":{{"memory_id":"{}"}}}},
                {{"id":"{}","version":1,"score":0.42,"payload":{{"memory_id":"{}"}}}}
            ],"status":"ok","time":0.001}}"#,
            first.0, first.1, second.0, second.1
        );

        let hits: Vec<Hit> = decode_result(&response(StatusCode::OK, &json)).unwrap();
        assert_eq!(hits[0].id, first.0);
        assert_eq!(hits[1].payload.unwrap().memory_id, second.1);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn scroll_page_exposes_next_offset() {
        let point = PointId::generate();
        let next = PointId::generate();
        let json = format!(
            r#"{{"result":{{"points":[{{"id":"{point}","payload":null}}],"next_page_offset":"{next}"}}}}"#
        );
        let page: ScrollPage = decode_result(&response(StatusCode::OK, &json)).unwrap();
        assert_eq!(page.next_page_offset, Some(next));
        assert!(memory_id(page.points[0].id, page.points[0].payload).is_err());
    }

    fn collection_info(vectors: &str) -> CollectionInfo {
        let json = format!(
            r#"{{"result":{{"status":"green","points_count":4,
                "config":{{"params":{{"vectors":{vectors},"shard_number":1}}}}}}}}"#
        );
        decode_result(&response(StatusCode::OK, &json)).unwrap()
    }

    #[test]
    fn existing_collection_must_match_the_vector_size() {
        let agent = AgentId::random();

        let info = collection_info(r#"{"size":1536,"distance":"Cosine"}"#);
        ensure_vector_size(agent, &info, 1536).unwrap();

        let err = ensure_vector_size(agent, &info, 64).expect_err("size mismatch");
        assert_eq!(err.backend(), Some(Backend::VectorIndex));
        assert!(err.to_string().contains("vector size 1536, expected 64"));

        let named = collection_info(r#"{"text":{"size":64,"distance":"Cosine"}}"#);
        assert!(ensure_vector_size(agent, &named, 64).is_err());
    }

    #[test]
    fn error_statuses_are_attributed_to_the_index() {
        let err = decode_result::<serde_json::Value>(&response(
            StatusCode::NOT_FOUND,
            r#"{"status":{"error":"Not found: Collection `x` doesn't exist!"}}"#,
        ))
        .expect_err("not found");
        assert_eq!(err.backend(), Some(Backend::VectorIndex));
        assert!(err.to_string().contains("doesn't exist"));
    }
}
