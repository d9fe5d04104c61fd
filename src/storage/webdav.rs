use super::{HashSource, ObjectStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// 构建 WebDAV 存储
pub async fn build(
    endpoint: &str,
    username: &str,
    password: &str,
    root: Option<String>,
) -> Result<ObjectStore> {
    use opendal::services::Webdav;

    let mut builder = Webdav::default()
        .endpoint(endpoint)
        .username(username)
        .password(password);

    if let Some(ref r) = root {
        builder = builder.root(r);
    }

    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
        .finish();

    let name = format!(
        "webdav://{}{}",
        endpoint.trim_end_matches('/'),
        root.as_deref()
            .map(|r| format!("/{}", r.trim_start_matches('/')))
            .unwrap_or_default()
    );

    // 某些 WebDAV 服务器需要先创建根目录；已存在时忽略错误
    if let Err(e) = operator.create_dir("/").await {
        tracing::debug!("创建 WebDAV 根目录失败（忽略）: {}", e);
    }

    Ok(ObjectStore::new(operator, name, HashSource::ContentMd5))
}
