use super::{HashSource, ObjectStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// 构建 S3 兼容存储
pub fn build(
    bucket: &str,
    region: &str,
    access_key: &str,
    secret_key: &str,
    endpoint: Option<String>,
    prefix: Option<String>,
) -> Result<ObjectStore> {
    use opendal::services::S3;

    let mut builder = S3::default()
        .bucket(bucket)
        .region(region)
        .access_key_id(access_key)
        .secret_access_key(secret_key);

    if let Some(ref ep) = endpoint {
        builder = builder.endpoint(ep);
    }

    if let Some(ref p) = prefix {
        builder = builder.root(p);
    }

    // 添加超时层
    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
        .finish();

    let name = format!(
        "s3://{}{}",
        bucket,
        prefix
            .as_deref()
            .map(|p| format!("/{}", p.trim_matches('/')))
            .unwrap_or_default()
    );

    Ok(ObjectStore::new(operator, name, HashSource::Etag))
}
