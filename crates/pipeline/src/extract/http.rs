//! Remote compositing service client.
//!
//! The service takes a JSON request describing collection, bands, reducer,
//! time window and AOI and answers with the composite as band-sequential
//! little-endian `f32` samples. Grid metadata travels in the
//! `x-raster-meta` response header.

use async_trait::async_trait;
use etl_common::{CrsCode, MultiPolygon};
use raster::{Band, GeoTransform, RasterArtifact};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{DataSource, ExtractRequest, Result};
use crate::error::ExtractionError;

/// Response header carrying [`RasterMeta`] as JSON.
pub const RASTER_META_HEADER: &str = "x-raster-meta";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Grid description returned alongside the sample data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMeta {
    pub width: usize,
    pub height: usize,
    /// `[origin_x, origin_y, pixel_width, pixel_height]`, north-up
    pub transform: [f64; 4],
    pub crs: String,
    pub nodata: f32,
    pub bands: Vec<String>,
    #[serde(default)]
    pub observations: u32,
}

/// HTTP data source for composited imagery.
pub struct HttpRasterSource {
    client: Client,
    endpoint: String,
}

impl HttpRasterSource {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ExtractionError::Unsupported(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}/v1/composite", self.endpoint)
    }
}

#[async_trait]
impl DataSource for HttpRasterSource {
    #[instrument(skip_all, fields(variable = %request.variable.name, endpoint = %self.endpoint))]
    async fn fetch(&self, request: &ExtractRequest<'_>) -> Result<RasterArtifact> {
        let body = request_body(request);
        debug!(collection = %request.variable.extractor.collection, "Requesting composite");

        let response = self
            .client
            .post(self.url())
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let meta = response
            .headers()
            .get(RASTER_META_HEADER)
            .ok_or_else(|| ExtractionError::InvalidResponse(format!("missing {} header", RASTER_META_HEADER)))?
            .to_str()
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))
            .and_then(parse_meta)?;

        let bytes = response.bytes().await.map_err(classify)?;
        decode_raster(&meta, &bytes)
    }
}

/// JSON body for a composite request.
pub fn request_body(request: &ExtractRequest<'_>) -> Value {
    let extractor = &request.variable.extractor;
    json!({
        "variable": request.variable.name,
        "collection": extractor.collection,
        "bands": extractor.bands,
        "reducer": extractor.reducer,
        "year": request.year,
        "start": request.window.map(|w| w.start.format("%Y-%m-%d").to_string()),
        "end": request.window.map(|w| w.end.format("%Y-%m-%d").to_string()),
        "geometry": geojson_multipolygon(&request.aoi.wgs84),
        "crs": request.crs.to_string(),
        "scale": extractor.native_resolution_m,
    })
}

fn geojson_multipolygon(geometry: &MultiPolygon) -> Value {
    let coordinates: Vec<Vec<Vec<[f64; 2]>>> = geometry
        .polygons()
        .iter()
        .map(|p| p.rings().map(|r| r.iter().map(|&(x, y)| [x, y]).collect()).collect())
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": coordinates })
}

pub fn parse_meta(header: &str) -> Result<RasterMeta> {
    serde_json::from_str(header)
        .map_err(|e| ExtractionError::InvalidResponse(format!("bad {} header: {}", RASTER_META_HEADER, e)))
}

/// Build an artifact from band-sequential little-endian `f32` samples.
pub fn decode_raster(meta: &RasterMeta, body: &[u8]) -> Result<RasterArtifact> {
    let invalid = |msg: String| ExtractionError::InvalidResponse(msg);

    if meta.width == 0 || meta.height == 0 || meta.bands.is_empty() {
        return Err(invalid(format!(
            "empty raster: {}x{} with {} bands",
            meta.width,
            meta.height,
            meta.bands.len()
        )));
    }

    let pixels = meta.width.checked_mul(meta.height).unwrap_or(usize::MAX);
    let expected = pixels
        .checked_mul(meta.bands.len())
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| invalid("raster dimensions overflow".to_string()))?;
    if body.len() != expected {
        return Err(invalid(format!(
            "body has {} bytes, expected {} for {}x{}x{}",
            body.len(),
            expected,
            meta.width,
            meta.height,
            meta.bands.len()
        )));
    }

    let crs = CrsCode::parse(&meta.crs).map_err(|e| invalid(e.to_string()))?;
    let [origin_x, origin_y, pixel_width, pixel_height] = meta.transform;

    let bands = meta
        .bands
        .iter()
        .zip(body.chunks_exact(pixels * 4))
        .map(|(name, chunk)| {
            let data = chunk
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Band::new(name.clone(), data)
        })
        .collect();

    RasterArtifact::new(
        bands,
        meta.width,
        meta.height,
        GeoTransform::new(origin_x, origin_y, pixel_width, pixel_height),
        crs,
        meta.nodata,
    )
    .map(|r| r.with_observations(meta.observations))
    .map_err(|e| invalid(e.to_string()))
}

fn status_error(status: StatusCode, body: &str) -> ExtractionError {
    let mut message = body.trim().to_string();
    if message.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("no body").to_string();
    }
    ExtractionError::from_status(status.as_u16(), message)
}

/// Map transport failures onto the retry taxonomy.
fn classify(err: reqwest::Error) -> ExtractionError {
    if err.is_timeout() {
        ExtractionError::Timeout(err.to_string())
    } else if let Some(status) = err.status() {
        ExtractionError::from_status(status.as_u16(), err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ExtractionError::Connection(err.to_string())
    } else {
        ExtractionError::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: usize, height: usize, bands: &[&str]) -> RasterMeta {
        RasterMeta {
            width,
            height,
            transform: [4_550_000.0, 3_271_000.0, 10.0, 10.0],
            crs: "EPSG:3035".to_string(),
            nodata: -9999.0,
            bands: bands.iter().map(|s| s.to_string()).collect(),
            observations: 12,
        }
    }

    fn encode(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_band_sequential() {
        let body = encode(&[1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0]);
        let raster = decode_raster(&meta(2, 2, &["B8", "B4"]), &body).unwrap();

        assert_eq!(raster.crs, CrsCode::Epsg3035);
        assert_eq!(raster.observations, 12);
        assert_eq!(raster.band("B8").unwrap().data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(raster.band("B4").unwrap().data, vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_decode_rejects_short_body() {
        let err = decode_raster(&meta(2, 2, &["B8", "B4"]), &encode(&[1.0; 7])).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_meta_header() {
        let header = r#"{"width":3,"height":2,"transform":[0,0,10,10],"crs":"EPSG:32633","nodata":-9999,"bands":["A00"]}"#;
        let parsed = parse_meta(header).unwrap();
        assert_eq!(parsed.width, 3);
        assert_eq!(parsed.observations, 0);
        assert!(parse_meta("{}").is_err());
    }

    #[test]
    fn test_status_errors_are_classified() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(matches!(
            status_error(StatusCode::PAYLOAD_TOO_LARGE, "too many pixels"),
            ExtractionError::TooLarge(_)
        ));
        let long = "x".repeat(2_000);
        match status_error(StatusCode::BAD_REQUEST, &long) {
            ExtractionError::InvalidResponse(msg) => assert!(msg.len() < 600),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_request_body() {
        use crate::aoi::parse_aoi;
        use crate::registry::VariableRegistry;
        use etl_common::Season;

        let variable = VariableRegistry::global().unwrap().resolve("ndvi").unwrap();
        let aoi = parse_aoi(test_utils::aoi::FIELD_A_WGS84, "field_a", CrsCode::Epsg3035).unwrap();
        let request = ExtractRequest {
            variable,
            aoi: &aoi,
            window: Season::Summer.window(2023),
            year: 2023,
            crs: CrsCode::Epsg3035,
        };

        let body = request_body(&request);
        assert_eq!(body["collection"], "COPERNICUS/S2_SR_HARMONIZED");
        assert_eq!(body["bands"], json!(["B8", "B4"]));
        assert_eq!(body["reducer"], "median");
        assert_eq!(body["start"], "2023-06-01");
        assert_eq!(body["end"], "2023-09-01");
        assert_eq!(body["crs"], "EPSG:3035");
        assert_eq!(body["geometry"]["coordinates"][0][0][0], json!([13.3, 52.5]));
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let source = HttpRasterSource::new("http://localhost:8080/", 5).unwrap();
        assert_eq!(source.url(), "http://localhost:8080/v1/composite");
    }
}
