use std::sync::LazyLock;

use prometheus::*;

static METRIC_INGEST_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("im_ingest_count", "count of the images added to the corpus").unwrap()
});

static METRIC_FEATURE_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("im_feature_written", "count of the features computed and cached")
        .unwrap()
});

static METRIC_CORPUS_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("im_corpus_size", "number of cached features in the last snapshot").unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_query_duration",
        "duration of the per-image query in seconds",
        &["size"]
    )
    .unwrap()
});

static METRIC_QUERY_MAX_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "im_query_max_score",
        "max score of the per-image query",
        &["size"],
        (-100..=100).step_by(10).map(|x| x as f64).collect()
    )
    .unwrap()
});

pub fn inc_ingest_count() {
    METRIC_INGEST_COUNT.inc();
}

pub fn inc_feature_written() {
    METRIC_FEATURE_WRITTEN.inc();
}

pub fn set_corpus_size(size: usize) {
    METRIC_CORPUS_SIZE.set(size as i64);
}

pub fn inc_query_duration(size: (u32, u32), duration: f32) {
    METRIC_QUERY_DURATION.with_label_values(&[to_fixed_size(size)]).observe(duration as f64);
}

pub fn inc_query_max_score(size: (u32, u32), score: f32) {
    METRIC_QUERY_MAX_SCORE.with_label_values(&[to_fixed_size(size)]).observe(score as f64);
}

/// 将图像面积范围调整到几个固定值
fn to_fixed_size((width, height): (u32, u32)) -> &'static str {
    let area = width as u64 * height as u64;
    if area <= 128 * 128 {
        "128"
    } else if area <= 256 * 256 {
        "256"
    } else if area <= 512 * 512 {
        "512"
    } else if area <= 1024 * 1024 {
        "1024"
    } else if area <= 2048 * 2048 {
        "2048"
    } else {
        "2048+"
    }
}
