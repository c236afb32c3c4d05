use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::Serialize;
use utoipa::ToSchema;

use crate::service::{Match, RefreshReport};

/// 添加图片请求参数
#[derive(TryFromMultipart)]
pub struct AddImageRequest {
    pub file: Vec<Bytes>,
}

/// 添加图片表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct AddImageForm {
    /// 上传的图片文件，可以是多张图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 添加失败的图片
#[derive(Debug, Serialize, ToSchema)]
pub struct AddImageFailure {
    /// 在上传文件中的序号，从 0 开始
    pub index: usize,
    pub error: String,
}

/// 添加图片响应
#[derive(Debug, Serialize, ToSchema)]
pub struct AddImageResponse {
    /// 成功添加的图片标识符，顺序与上传顺序一致
    pub ids: Vec<String>,
    /// 添加失败的图片，其余图片不受影响
    pub failed: Vec<AddImageFailure>,
}

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub upload_image: Bytes,
    pub k: Option<usize>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub upload_image: String,
    /// 返回的结果数量，默认为 30
    pub k: Option<usize>,
}

/// 一条搜索结果
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchMatch {
    /// 图片标识符
    pub id: String,
    /// 原图路径
    pub path: String,
    /// L2 距离
    pub distance: f32,
    /// 展示评分 `(1 - distance) * 100`，可能为负数
    pub score: f32,
}

impl From<&Match> for SearchMatch {
    fn from(m: &Match) -> Self {
        Self { id: m.id.to_string(), path: m.path.clone(), distance: m.distance, score: m.score }
    }
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 查询图片保存后的路径
    pub query: String,
    /// 按距离升序排列的结果
    pub result: Vec<SearchMatch>,
}

/// 精简搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct InferenceForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub upload_image: String,
}

/// 精简结果中的一项
#[derive(Debug, Serialize, ToSchema)]
pub struct Similarity {
    pub score: f32,
    pub path: String,
}

/// 精简搜索响应，只包含前 3 个结果
#[derive(Debug, Serialize, ToSchema)]
pub struct InferenceResponse {
    /// 查询图片保存后的路径
    pub query: String,
    pub similarity: Vec<Similarity>,
}

/// 补充特征响应
#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    /// 缺少特征的图片数量
    pub scanned: usize,
    /// 成功补充的数量
    pub embedded: usize,
    /// 失败的数量
    pub failed: usize,
}

impl From<RefreshReport> for RefreshResponse {
    fn from(r: RefreshReport) -> Self {
        Self { scanned: r.scanned, embedded: r.embedded, failed: r.failed }
    }
}
