//! Object-storage layout for scripts, results and logs.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::control::ObjectStore;
use crate::error::EmrError;

/// Bucket and key prefix every artifact is written under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    pub bucket: String,
    pub prefix: String,
}

impl OutputLayout {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    /// `<prefix>/query/<date>/<file>`: where generated scripts are uploaded.
    pub fn script_key(&self, date: &str, file_name: &str) -> String {
        format!("{}/query/{}/{}", self.prefix, date, file_name)
    }

    /// Single-file result of a Hive or Presto step.
    pub fn text_output(&self, date: &str, playground_id: Uuid, task_id: Uuid) -> String {
        self.uri(&format!("{}/{}/{}/{}.txt", self.prefix, date, playground_id, task_id))
    }

    /// Key of the CSV written by the in-process SQL executor.
    pub fn csv_output_key(&self, date: &str, playground_id: Uuid, task_id: Uuid) -> String {
        format!("{}/{}/{}/{}.csv", self.prefix, date, playground_id, task_id)
    }

    /// Directory a SparkSQL step writes its part files into.
    pub fn spark_sql_output_dir(
        &self,
        date: &str,
        playground_id: Uuid,
        task_id: Uuid,
        unique_id: &str,
    ) -> String {
        self.uri(&format!(
            "{}/sparksql-output/{}/{}/{}/{}/",
            self.prefix, date, playground_id, task_id, unique_id
        ))
    }

    pub fn log_path(
        &self,
        date: &str,
        kind: &str,
        playground_id: Uuid,
        task_id: Uuid,
        unique_id: &str,
    ) -> String {
        self.uri(&format!(
            "{}/logs/{}/{}-log-{}-{}-{}.log",
            self.prefix,
            date,
            kind.to_ascii_lowercase(),
            playground_id,
            task_id,
            unique_id
        ))
    }
}

/// Split `s3://bucket/key` into `(bucket, key)`.
pub fn split_s3_uri(uri: &str) -> Result<(&str, &str), EmrError> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| EmrError::InvalidLocation(uri.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() => Ok((bucket, key)),
        None if !rest.is_empty() => Ok((rest, "")),
        _ => Err(EmrError::InvalidLocation(uri.to_string())),
    }
}

/// Spark writes markers and checksums next to its part files.
pub fn is_spark_metadata_file(file_name: &str) -> bool {
    const SUFFIXES: [&str; 5] = [".crc", ".meta", ".index", ".summary", ".tmp"];
    file_name.is_empty()
        || file_name.starts_with('_')
        || SUFFIXES.iter().any(|s| file_name.ends_with(s))
}

/// First non-metadata object under the directory `dir_uri`, as a full URI.
pub async fn first_data_file(
    store: &dyn ObjectStore,
    dir_uri: &str,
) -> Result<Option<String>, EmrError> {
    let (bucket, key) = split_s3_uri(dir_uri)?;
    let dir_key = if key.ends_with('/') || key.is_empty() {
        key.to_string()
    } else {
        format!("{}/", key)
    };

    for object_key in store.list_keys(bucket, &dir_key).await? {
        if object_key.ends_with('/') || object_key == dir_key {
            continue;
        }
        let file_name = object_key.rsplit('/').next().unwrap_or_default();
        if is_spark_metadata_file(file_name) {
            debug!(key = %object_key, "Skipping Spark metadata file");
            continue;
        }
        return Ok(Some(format!("s3://{}/{}", bucket, object_key)));
    }

    warn!(dir = %dir_uri, "No data files found in directory");
    Ok(None)
}
