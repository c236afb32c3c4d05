use std::sync::Arc;

use crate::SearchService;

/// 应用状态
pub struct AppState {
    /// 检索服务
    pub service: Arc<SearchService>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(service: Arc<SearchService>) -> Arc<Self> {
        Arc::new(AppState { service })
    }
}
