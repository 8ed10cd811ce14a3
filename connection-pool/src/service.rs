//! 数据源生命周期服务模块

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::errors::{EngineError, EngineResult};
use common::models::{SourceConfig, SourceStatus};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::pool_manager::ConnectionPoolRegistry;

/// 数据源生命周期 Trait
///
/// 管理端的新增、修改、启用、停用、删除操作映射到注册表的 add/remove。
#[async_trait]
pub trait SourceLifecycle: Send + Sync {
    /// 注册新数据源（ID 为空时自动生成）
    async fn register(&self, config: SourceConfig) -> EngineResult<SourceConfig>;

    /// 用新配置替换已注册的数据源
    async fn reconfigure(&self, id: &str, config: SourceConfig) -> EngineResult<SourceConfig>;

    /// 重新启用已停用的数据源
    async fn enable(&self, id: &str) -> EngineResult<SourceConfig>;

    /// 停用数据源（关闭连接池，保留配置）
    async fn disable(&self, id: &str) -> EngineResult<()>;

    /// 删除数据源
    async fn unregister(&self, id: &str) -> EngineResult<()>;

    /// 探测连接
    async fn probe(&self, id: &str) -> EngineResult<bool>;
}

/// 数据源生命周期服务
pub struct SourceService {
    registry: Arc<ConnectionPoolRegistry>,
    /// 已停用的数据源配置
    disabled: Mutex<HashMap<String, SourceConfig>>,
}

impl SourceService {
    /// 创建新的服务实例
    pub fn new(registry: Arc<ConnectionPoolRegistry>) -> Self {
        Self {
            registry,
            disabled: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionPoolRegistry> {
        &self.registry
    }

    /// 已停用的数据源 ID
    pub async fn disabled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.disabled.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl SourceLifecycle for SourceService {
    async fn register(&self, mut config: SourceConfig) -> EngineResult<SourceConfig> {
        if config.id.trim().is_empty() {
            config.id = Uuid::new_v4().to_string();
        }
        let id = config.id.trim().to_string();
        if self.disabled.lock().await.contains_key(&id) {
            return Err(EngineError::configuration(format!("data source is disabled: {}", id)).with_source_id(&id));
        }

        self.registry.add(config).await?;
        tracing::info!(source_id = %id, "数据源已注册");
        self.registry.source_config(&id).await
    }

    async fn reconfigure(&self, id: &str, config: SourceConfig) -> EngineResult<SourceConfig> {
        self.registry.update(id, config).await?;
        tracing::info!(source_id = %id, "数据源配置已更新");
        self.registry.source_config(id).await
    }

    async fn enable(&self, id: &str) -> EngineResult<SourceConfig> {
        let mut disabled = self.disabled.lock().await;
        let mut config = disabled.remove(id).ok_or_else(|| {
            EngineError::configuration(format!("data source is not disabled: {}", id)).with_source_id(id)
        })?;
        config.health.status = SourceStatus::Enabled;

        if let Err(e) = self.registry.add(config.clone()).await {
            config.health.status = SourceStatus::Disabled;
            disabled.insert(id.to_string(), config);
            return Err(e);
        }
        drop(disabled);

        tracing::info!(source_id = %id, "数据源已启用");
        self.registry.source_config(id).await
    }

    async fn disable(&self, id: &str) -> EngineResult<()> {
        let mut config = self.registry.source_config(id).await?;
        config.health.status = SourceStatus::Disabled;

        self.disabled.lock().await.insert(id.to_string(), config);
        self.registry.remove(id).await;
        tracing::info!(source_id = %id, "数据源已停用");
        Ok(())
    }

    async fn unregister(&self, id: &str) -> EngineResult<()> {
        let was_disabled = self.disabled.lock().await.remove(id).is_some();
        let was_registered = self.registry.remove(id).await;
        if was_disabled || was_registered {
            tracing::info!(source_id = %id, "数据源已删除");
        }
        Ok(())
    }

    async fn probe(&self, id: &str) -> EngineResult<bool> {
        self.registry.test_connection(id).await
    }
}
