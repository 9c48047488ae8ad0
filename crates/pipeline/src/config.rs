//! Job configuration: loading, deep merge, validation and matrix expansion.
//!
//! A run is described by two YAML trees: a base document holding project
//! defaults (optionally wrapped in `defaults:`) and a job document
//! (optionally wrapped in `job:`). The job wins key by key; mappings merge
//! recursively, sequences and scalars replace, and an explicit `null` in the
//! job deletes the key.
//!
//! Supports environment variable substitution using ${VAR} syntax.

use etl_common::{CrsCode, Season, TimeWindow};
use raster::ResamplingMethod;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::extract::RetryPolicy;
use crate::naming::slugify;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Staging directory for `gcs_cog` exports when none is configured.
pub const DEFAULT_STAGING_DIR: &str = "data/outputs";

/// Legacy key names accepted in either document.
const ALIASES: &[(&str, &str)] = &[
    ("aoi_path", "aoi"),
    ("aoi_paths", "aois"),
    ("target_crs", "crs"),
];

// ============================================================================
// Resolved job
// ============================================================================

/// A fully resolved and validated job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    pub name: String,
    pub aoi: PathBuf,
    pub crs: CrsCode,
    pub resolution_m: f64,
    pub year: i32,
    pub season: Season,
    pub variables: Vec<String>,
    pub storage: StorageTarget,
    /// Overrides the bilinear default for continuous variables
    pub resampling: Option<ResamplingMethod>,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub source: SourceSettings,
    pub cog: CogSettings,
}

impl JobSpec {
    /// Acquisition window for the job's year and season; `None` for `static`.
    pub fn window(&self) -> Option<TimeWindow> {
        self.season.window(self.year)
    }
}

/// Where exported COGs go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageTarget {
    LocalCog {
        output_dir: PathBuf,
    },
    GcsCog {
        bucket: String,
        prefix: String,
        /// Local directory the COG is written to before upload
        staging_dir: PathBuf,
    },
}

impl StorageTarget {
    /// Directory the local COG is written to.
    pub fn local_dir(&self) -> &Path {
        match self {
            Self::LocalCog { output_dir } => output_dir,
            Self::GcsCog { staging_dir, .. } => staging_dir,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalCog { .. } => "local_cog",
            Self::GcsCog { .. } => "gcs_cog",
        }
    }
}

/// Data source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSettings {
    /// Base URL of the remote composite service
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    /// Largest export the remote service accepts, in pixels
    pub max_pixels: u64,
    /// Directory holding local CLCplus rasters
    pub clcplus_dir: Option<PathBuf>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 300,
            max_pixels: 100_000_000,
            clcplus_dir: None,
        }
    }
}

/// COG encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CogSettings {
    pub tile_size: usize,
    pub compression_level: u32,
}

impl Default for CogSettings {
    fn default() -> Self {
        Self {
            tile_size: 512,
            compression_level: 6,
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Merge `base` and `job` and validate the result into a [`JobSpec`].
///
/// Required keys are checked in a fixed order (`aoi`, `crs`, `resolution_m`,
/// `year`, `season`, `variables`, `storage.kind`, then the storage-specific
/// keys) and the first problem found is reported.
pub fn resolve(base: &Value, job: &Value) -> Result<JobSpec> {
    let merged = merged_tree(base, job)?;
    from_tree(&merged)
}

/// Expand list-valued `aoi`/`aois`, `season`/`seasons` and `year`/`years`
/// into one [`JobSpec`] per combination, ordered AOI, then season, then year.
pub fn resolve_matrix(base: &Value, job: &Value) -> Result<Vec<JobSpec>> {
    let merged = merged_tree(base, job)?;

    let aois = axis(&merged, "aoi", "aois")?;
    let seasons = axis(&merged, "season", "seasons")?;
    let years = axis(&merged, "year", "years")?;

    let mut jobs = Vec::with_capacity(aois.len() * seasons.len() * years.len());
    for aoi in &aois {
        for season in &seasons {
            for year in &years {
                let mut tree = merged.clone();
                if let Value::Mapping(map) = &mut tree {
                    for plural in ["aois", "seasons", "years"] {
                        map.remove(plural);
                    }
                    map.insert("aoi".into(), aoi.clone());
                    map.insert("season".into(), season.clone());
                    map.insert("year".into(), year.clone());
                }
                jobs.push(from_tree(&tree)?);
            }
        }
    }
    Ok(jobs)
}

/// Unwrap, alias and merge the two documents.
pub fn merged_tree(base: &Value, job: &Value) -> Result<Value> {
    let base = normalize(base, "defaults")?;
    let job = normalize(job, "job")?;
    Ok(merge(&base, &job))
}

/// Deep-merge `overlay` onto `base`.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(b), Value::Mapping(o)) => {
            let mut out = b.clone();
            for (key, value) in o {
                if value.is_null() {
                    out.remove(key);
                    continue;
                }
                let merged = match out.get(key) {
                    Some(existing) => merge(existing, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Mapping(out)
        }
        (_, overlay) => overlay.clone(),
    }
}

fn normalize(tree: &Value, wrapper: &str) -> Result<Value> {
    let map = match tree {
        Value::Null => return Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(map) => map,
        _ => {
            return Err(ConfigError::Parse(
                "top level of a configuration document must be a mapping".to_string(),
            ))
        }
    };

    let mut inner = match map.get(wrapper) {
        Some(Value::Mapping(wrapped)) => wrapped.clone(),
        _ => map.clone(),
    };

    for (alias, canonical) in ALIASES {
        if let Some(value) = inner.remove(*alias) {
            if !inner.contains_key(*canonical) {
                inner.insert((*canonical).into(), value);
            }
        }
    }

    Ok(Value::Mapping(inner))
}

fn axis(tree: &Value, singular: &str, plural: &str) -> Result<Vec<Value>> {
    let value = lookup(tree, plural).or_else(|| lookup(tree, singular));
    match value {
        // Leave it missing so validation reports it in the usual order
        None => Ok(vec![Value::Null]),
        Some(Value::Sequence(items)) if items.is_empty() => {
            Err(ConfigError::invalid(singular, "list must not be empty"))
        }
        Some(Value::Sequence(items)) => Ok(items.clone()),
        Some(other) => Ok(vec![other.clone()]),
    }
}

/// Validate a merged tree.
pub fn from_tree(tree: &Value) -> Result<JobSpec> {
    let aoi = PathBuf::from(string(tree, "aoi")?);

    let crs = parse_crs(tree)?;

    let resolution_m = number(tree, "resolution_m")?;
    if !(resolution_m.is_finite() && resolution_m > 0.0) {
        return Err(ConfigError::invalid("resolution_m", "must be a positive number"));
    }

    let year = integer(tree, "year")?;
    let year = i32::try_from(year)
        .ok()
        .filter(|y| (1..=9999).contains(y))
        .ok_or_else(|| ConfigError::invalid("year", format!("{} is out of range", year)))?;

    let season_text = string(tree, "season")?;
    let season = Season::parse(&season_text).map_err(|e| ConfigError::invalid("season", e.to_string()))?;

    let variables = variables(tree)?;
    let storage = storage(tree)?;

    // Optional keys
    let name = match lookup(tree, "name") {
        Some(_) => string(tree, "name")?,
        None => {
            let stem = aoi
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("{}_{}_{}", slugify(&stem), year, season)
        }
    };

    let resampling = match lookup(tree, "resampling") {
        Some(_) => {
            let text = string(tree, "resampling")?;
            Some(ResamplingMethod::parse(&text).ok_or_else(|| {
                ConfigError::invalid("resampling", format!("'{}' is not nearest, bilinear or cubic", text))
            })?)
        }
        None => None,
    };

    let workers = optional_integer(tree, "workers")?.unwrap_or(1);
    if !(1..=64).contains(&workers) {
        return Err(ConfigError::invalid("workers", "must be between 1 and 64"));
    }

    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_retries: optional_integer(tree, "extraction.max_retries")?
            .map(|v| to_u32("extraction.max_retries", v))
            .transpose()?
            .unwrap_or(defaults.max_retries),
        initial_backoff_ms: optional_integer(tree, "extraction.initial_backoff_ms")?
            .map(|v| to_u64("extraction.initial_backoff_ms", v))
            .transpose()?
            .unwrap_or(defaults.initial_backoff_ms),
        max_backoff_ms: optional_integer(tree, "extraction.max_backoff_ms")?
            .map(|v| to_u64("extraction.max_backoff_ms", v))
            .transpose()?
            .unwrap_or(defaults.max_backoff_ms),
    };
    if retry.max_backoff_ms < retry.initial_backoff_ms {
        return Err(ConfigError::invalid(
            "extraction.max_backoff_ms",
            "must not be smaller than extraction.initial_backoff_ms",
        ));
    }

    let source_defaults = SourceSettings::default();
    let source = SourceSettings {
        endpoint: optional_string(tree, "source.endpoint")?,
        timeout_secs: optional_integer(tree, "source.timeout_secs")?
            .map(|v| to_u64("source.timeout_secs", v))
            .transpose()?
            .unwrap_or(source_defaults.timeout_secs),
        max_pixels: optional_integer(tree, "source.max_pixels")?
            .map(|v| to_u64("source.max_pixels", v))
            .transpose()?
            .unwrap_or(source_defaults.max_pixels),
        clcplus_dir: optional_string(tree, "clcplus.input_dir")?.map(PathBuf::from),
    };

    let cog_defaults = CogSettings::default();
    let cog = CogSettings {
        tile_size: optional_integer(tree, "cog.tile_size")?
            .map(|v| to_u32("cog.tile_size", v).map(|v| v as usize))
            .transpose()?
            .unwrap_or(cog_defaults.tile_size),
        compression_level: optional_integer(tree, "cog.compression_level")?
            .map(|v| to_u32("cog.compression_level", v))
            .transpose()?
            .unwrap_or(cog_defaults.compression_level),
    };
    if cog.tile_size == 0 || cog.tile_size % 16 != 0 {
        return Err(ConfigError::invalid("cog.tile_size", "must be a positive multiple of 16"));
    }
    if cog.compression_level > 9 {
        return Err(ConfigError::invalid("cog.compression_level", "must be between 0 and 9"));
    }

    Ok(JobSpec {
        name,
        aoi,
        crs,
        resolution_m,
        year,
        season,
        variables,
        storage,
        resampling,
        workers: workers as usize,
        retry,
        source,
        cog,
    })
}

fn parse_crs(tree: &Value) -> Result<CrsCode> {
    let text = string(tree, "crs")?;
    let crs = CrsCode::parse(&text).map_err(|e| ConfigError::invalid("crs", e.to_string()))?;

    if let Some(allowed) = lookup(tree, "allowed_crs") {
        let Value::Sequence(items) = allowed else {
            return Err(ConfigError::invalid("allowed_crs", "expected a list of CRS codes"));
        };
        let mut codes = Vec::with_capacity(items.len());
        for item in items {
            let text = scalar_text(item)
                .ok_or_else(|| ConfigError::invalid("allowed_crs", "expected a list of CRS codes"))?;
            codes.push(CrsCode::parse(&text).map_err(|e| ConfigError::invalid("allowed_crs", e.to_string()))?);
        }
        if !codes.contains(&crs) {
            let listed: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
            return Err(ConfigError::invalid(
                "crs",
                format!("{} is not in allowed_crs [{}]", crs, listed.join(", ")),
            ));
        }
    }

    Ok(crs)
}

fn variables(tree: &Value) -> Result<Vec<String>> {
    let value = require(tree, "variables")?;
    let names: Vec<String> = match value {
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                scalar_text(item)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ConfigError::invalid("variables", "entries must be non-empty strings"))
            })
            .collect::<Result<_>>()?,
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => return Err(ConfigError::invalid("variables", "expected a list of variable names")),
    };

    if names.is_empty() {
        return Err(ConfigError::invalid("variables", "must list at least one variable"));
    }

    let mut seen = std::collections::HashSet::new();
    for name in &names {
        if !seen.insert(name.to_lowercase()) {
            return Err(ConfigError::invalid("variables", format!("duplicate variable '{}'", name)));
        }
    }

    Ok(names)
}

fn storage(tree: &Value) -> Result<StorageTarget> {
    let kind = string(tree, "storage.kind")?;
    match kind.as_str() {
        "local_cog" => Ok(StorageTarget::LocalCog {
            output_dir: PathBuf::from(string(tree, "storage.output_dir")?),
        }),
        "gcs_cog" => {
            let bucket = string(tree, "storage.bucket")?;
            let bucket = bucket.trim_start_matches("gs://").trim_end_matches('/').to_string();
            if bucket.is_empty() {
                return Err(ConfigError::invalid("storage.bucket", "bucket name is empty"));
            }
            Ok(StorageTarget::GcsCog {
                bucket,
                prefix: optional_string(tree, "storage.prefix")?
                    .unwrap_or_default()
                    .trim_matches('/')
                    .to_string(),
                staging_dir: PathBuf::from(
                    optional_string(tree, "storage.output_dir")?
                        .unwrap_or_else(|| DEFAULT_STAGING_DIR.to_string()),
                ),
            })
        }
        other => Err(ConfigError::invalid(
            "storage.kind",
            format!("'{}' is not local_cog or gcs_cog", other),
        )),
    }
}

// ============================================================================
// Tree access
// ============================================================================

/// Value at a dotted key; explicit nulls count as missing.
pub fn lookup<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = tree;
    for part in key.split('.') {
        current = current.as_mapping()?.get(part)?;
    }
    (!current.is_null()).then_some(current)
}

fn require<'a>(tree: &'a Value, key: &str) -> Result<&'a Value> {
    lookup(tree, key).ok_or_else(|| ConfigError::MissingKey(key.to_string()))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string(tree: &Value, key: &str) -> Result<String> {
    match require(tree, key)? {
        Value::Sequence(_) => Err(ConfigError::invalid(
            key,
            "expected a single value; lists are only accepted when expanding a job matrix",
        )),
        value => scalar_text(value)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::invalid(key, "expected a non-empty string")),
    }
}

fn optional_string(tree: &Value, key: &str) -> Result<Option<String>> {
    match lookup(tree, key) {
        Some(_) => string(tree, key).map(Some),
        None => Ok(None),
    }
}

fn number(tree: &Value, key: &str) -> Result<f64> {
    match require(tree, key)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ConfigError::invalid(key, "expected a number")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a number", s))),
        _ => Err(ConfigError::invalid(key, "expected a number")),
    }
}

fn integer(tree: &Value, key: &str) -> Result<i64> {
    match require(tree, key)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ConfigError::invalid(key, format!("{} is not an integer", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(key, format!("'{}' is not an integer", s))),
        Value::Sequence(_) => Err(ConfigError::invalid(
            key,
            "expected a single value; lists are only accepted when expanding a job matrix",
        )),
        _ => Err(ConfigError::invalid(key, "expected an integer")),
    }
}

fn optional_integer(tree: &Value, key: &str) -> Result<Option<i64>> {
    match lookup(tree, key) {
        Some(_) => integer(tree, key).map(Some),
        None => Ok(None),
    }
}

fn to_u32(key: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| ConfigError::invalid(key, format!("{} is out of range", value)))
}

fn to_u64(key: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| ConfigError::invalid(key, format!("{} must not be negative", value)))
}

// ============================================================================
// Loading
// ============================================================================

/// Read a YAML document with environment variable substitution.
pub fn load_tree<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let expanded = expand_env_vars(&content)?;
    parse_tree(&expanded)
}

/// Parse YAML text; an empty document becomes an empty mapping.
pub fn parse_tree(text: &str) -> Result<Value> {
    let value: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Accept a JSON tree, e.g. a job built programmatically by a UI.
pub fn tree_from_json(json: &serde_json::Value) -> Result<Value> {
    serde_yaml::to_value(json).map_err(|e| ConfigError::Parse(e.to_string()))
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in YAML content
/// Supports ${VAR} and ${VAR:-default} syntax
pub fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => return Err(ConfigError::UnclosedSubstitution(var_expr)),
                }
            }

            result.push_str(&resolve_var_expr(&var_expr)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).map_err(|_| ConfigError::MissingEnv(expr.trim().to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        parse_tree(text).unwrap()
    }

    const BASE: &str = r#"
defaults:
  crs: EPSG:3035
  resolution_m: 10
  storage:
    kind: local_cog
    output_dir: data/outputs
"#;

    #[test]
    fn test_job_overrides_base_key_by_key() {
        let job = yaml(
            r#"
job:
  aoi: aois/field_a.geojson
  year: 2023
  season: summer
  variables: [ndvi]
  resolution_m: 20
  storage:
    output_dir: /tmp/out
"#,
        );
        let spec = resolve(&yaml(BASE), &job).unwrap();
        assert_eq!(spec.resolution_m, 20.0);
        assert_eq!(spec.crs, CrsCode::Epsg3035);
        // storage.kind kept from base, output_dir from job
        assert_eq!(
            spec.storage,
            StorageTarget::LocalCog {
                output_dir: PathBuf::from("/tmp/out")
            }
        );
        assert_eq!(spec.name, "field_a_2023_summer");
    }

    #[test]
    fn test_null_deletes_key() {
        let merged = merge(
            &yaml("a: 1\nb: {c: 2, d: 3}"),
            &yaml("b: {c: null}"),
        );
        assert_eq!(merged, yaml("a: 1\nb: {d: 3}"));
    }

    #[test]
    fn test_sequences_replace() {
        let merged = merge(&yaml("v: [a, b]"), &yaml("v: [c]"));
        assert_eq!(merged, yaml("v: [c]"));
    }

    #[test]
    fn test_missing_keys_reported_in_order() {
        let err = resolve(&Value::Null, &yaml("variables: [ndvi]")).unwrap_err();
        assert_eq!(err, ConfigError::MissingKey("aoi".into()));

        let err = resolve(&Value::Null, &yaml("aoi: a.geojson\nyear: 2023")).unwrap_err();
        assert_eq!(err, ConfigError::MissingKey("crs".into()));

        let err = resolve(
            &yaml(BASE),
            &yaml("aoi: a.geojson\nyear: 2023\nseason: summer"),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingKey("variables".into()));
    }

    #[test]
    fn test_storage_specific_keys() {
        let job = yaml(
            r#"
aoi: a.geojson
year: 2023
season: summer
variables: [ndvi]
storage:
  kind: gcs_cog
  output_dir: null
"#,
        );
        let err = resolve(&yaml(BASE), &job).unwrap_err();
        assert_eq!(err, ConfigError::MissingKey("storage.bucket".into()));
    }

    #[test]
    fn test_gcs_target_defaults() {
        let job = yaml(
            r#"
aoi: a.geojson
year: 2023
season: summer
variables: [ndvi]
storage:
  kind: gcs_cog
  bucket: gs://my-bucket/
  prefix: /cogs/
  output_dir: null
"#,
        );
        let spec = resolve(&yaml(BASE), &job).unwrap();
        assert_eq!(
            spec.storage,
            StorageTarget::GcsCog {
                bucket: "my-bucket".into(),
                prefix: "cogs".into(),
                staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            }
        );
    }

    #[test]
    fn test_aliases_and_allowed_crs() {
        let base = yaml("allowed_crs: [EPSG:3035, EPSG:4326]\nresolution_m: 10\nstorage: {kind: local_cog, output_dir: o}");
        let job = yaml("aoi_path: a.geojson\ntarget_crs: EPSG:32633\nyear: 2023\nseason: summer\nvariables: [ndvi]");
        let err = resolve(&base, &job).unwrap_err();
        assert_eq!(err.key(), Some("crs"));

        let job = yaml("aoi_path: a.geojson\ntarget_crs: 4326\nyear: 2023\nseason: summer\nvariables: [ndvi]");
        let spec = resolve(&base, &job).unwrap();
        assert_eq!(spec.crs, CrsCode::Epsg4326);
        assert_eq!(spec.aoi, PathBuf::from("a.geojson"));
    }

    #[test]
    fn test_duplicate_variables_rejected() {
        let job = yaml("aoi: a.geojson\nyear: 2023\nseason: summer\nvariables: [ndvi, NDVI]");
        let err = resolve(&yaml(BASE), &job).unwrap_err();
        assert_eq!(err.key(), Some("variables"));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let job = yaml("aoi: a.geojson\nyear: 2023\nseason: summer\nvariables: [ndvi, ndmi]");
        assert_eq!(
            resolve(&yaml(BASE), &job).unwrap(),
            resolve(&yaml(BASE), &job).unwrap()
        );
    }

    #[test]
    fn test_matrix_order() {
        let job = yaml(
            r#"
aois: [a.geojson, b.geojson]
seasons: [spring, summer]
years: [2022, 2023]
variables: [ndvi]
"#,
        );
        let specs = resolve_matrix(&yaml(BASE), &job).unwrap();
        let keys: Vec<(String, String, i32)> = specs
            .iter()
            .map(|s| (s.aoi.display().to_string(), s.season.to_string(), s.year))
            .collect();
        assert_eq!(keys.len(), 8);
        assert_eq!(keys[0], ("a.geojson".to_string(), "spring".to_string(), 2022));
        assert_eq!(keys[1], ("a.geojson".to_string(), "spring".to_string(), 2023));
        assert_eq!(keys[2], ("a.geojson".to_string(), "summer".to_string(), 2022));
        assert_eq!(keys[4], ("b.geojson".to_string(), "spring".to_string(), 2022));
    }

    #[test]
    fn test_single_resolve_rejects_lists() {
        let job = yaml("aoi: a.geojson\nyear: [2022, 2023]\nseason: summer\nvariables: [ndvi]");
        let err = resolve(&yaml(BASE), &job).unwrap_err();
        assert_eq!(err.key(), Some("year"));
    }

    #[test]
    fn test_tree_from_json() {
        let json = serde_json::json!({
            "aoi": "a.geojson", "year": 2023, "season": "annual", "variables": ["bsi"]
        });
        let spec = resolve(&yaml(BASE), &tree_from_json(&json).unwrap()).unwrap();
        assert_eq!(spec.season, Season::Annual);
    }

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("ETL_TEST_BUCKET", "bucket-a");
        let result = expand_env_vars("bucket: ${ETL_TEST_BUCKET}").unwrap();
        assert_eq!(result, "bucket: bucket-a");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("ETL_TEST_UNSET");
        let result = expand_env_vars("dir: ${ETL_TEST_UNSET:-data/outputs}").unwrap();
        assert_eq!(result, "dir: data/outputs");
    }

    #[test]
    fn test_expand_env_vars_missing_required() {
        std::env::remove_var("ETL_TEST_REQUIRED");
        assert_eq!(
            expand_env_vars("${ETL_TEST_REQUIRED}"),
            Err(ConfigError::MissingEnv("ETL_TEST_REQUIRED".into()))
        );
        assert!(matches!(
            expand_env_vars("${UNCLOSED"),
            Err(ConfigError::UnclosedSubstitution(_))
        ));
    }
}
