/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Local calendar date used for expiry comparisons
pub fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

/// `yyyymmdd` stamp used in business numbers (order no, alarm code)
pub fn date_stamp() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}
