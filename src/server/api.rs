use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::{info, warn};
use tokio::task::block_in_place;

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::SearchService;

/// 搜索一张图片，返回全部排序结果
///
/// 查询图片同样会加入图库。
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    let k = data.k.unwrap_or(state.service.options().k);

    info!("正在搜索上传图片");

    let result = block_in_place(|| state.service.query_k(&data.upload_image, k))?;

    Ok(Json(SearchResponse {
        time: start.elapsed().as_millis() as u64,
        query: result.query.original.display().to_string(),
        result: result.results.iter().map(SearchMatch::from).collect(),
    }))
}

/// 搜索一张图片，只返回前几个结果
#[utoipa::path(
    post,
    path = "/inference",
    request_body(content = InferenceForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = InferenceResponse),
    )
)]
pub async fn inference_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<InferenceResponse>> {
    let result = block_in_place(|| state.service.query(&data.upload_image))?;

    Ok(Json(InferenceResponse {
        query: result.query.original.display().to_string(),
        similarity: result
            .summary
            .iter()
            .map(|m| Similarity { score: m.score, path: m.path.clone() })
            .collect(),
    }))
}

/// 添加图片到图库
///
/// 每张图片独立处理，某一张失败不影响其他图片，已经添加的图片会保留。
#[utoipa::path(
    post,
    path = "/add",
    request_body(content = AddImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = AddImageResponse),
    )
)]
pub async fn add_image_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<AddImageRequest>,
) -> Result<Json<AddImageResponse>> {
    let response = block_in_place(|| add_images(&state.service, &data.file));
    Ok(Json(response))
}

fn add_images(service: &SearchService, files: &[Bytes]) -> AddImageResponse {
    let mut response = AddImageResponse { ids: vec![], failed: vec![] };
    for (index, file) in files.iter().enumerate() {
        match service.ingest(file) {
            Ok(record) => response.ids.push(record.id.to_string()),
            Err(e) => {
                warn!("添加第 {} 张图片失败: {}", index, e);
                response.failed.push(AddImageFailure { index, error: e.to_string() });
            }
        }
    }
    response
}

/// 为缺少特征的图片补充计算特征
#[utoipa::path(
    post,
    path = "/refresh",
    responses(
        (status = 200, body = RefreshResponse),
    )
)]
pub async fn refresh_handler(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>> {
    let report = block_in_place(|| state.service.refresh())?;
    Ok(Json(report.into()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use image::{DynamicImage, ImageFormat, RgbImage};
    use tempfile::TempDir;

    use super::*;
    use crate::ThumbnailExtractor;
    use crate::config::{ConfDir, SearchOptions};

    fn png() -> Bytes {
        let mut buf = Cursor::new(vec![]);
        DynamicImage::ImageRgb8(RgbImage::new(8, 8)).write_to(&mut buf, ImageFormat::Png).unwrap();
        Bytes::from(buf.into_inner())
    }

    #[test]
    fn test_add_images_reports_each_file() {
        let dir = TempDir::new().unwrap();
        let service = SearchService::open(
            &ConfDir::new(dir.path()),
            Arc::new(ThumbnailExtractor::default()),
            SearchOptions::default(),
        )
        .unwrap();

        let files = [png(), Bytes::from_static(b"not an image"), png()];
        let response = add_images(&service, &files);
        assert_eq!(response.ids.len(), 2);
        assert_eq!(response.failed.len(), 1);
        assert_eq!(response.failed[0].index, 1);
        // 失败之前和之后的图片都已入库
        assert_eq!(service.cache().len().unwrap(), 2);
    }
}
