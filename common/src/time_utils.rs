use time::OffsetDateTime;

pub fn utc_now_ms() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

pub fn utc_now_secs() -> u64 {
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    if ts < 0 { 0 } else { ts as u64 }
}

/// Renders a `(tv_sec, tv_usec)` pair the way operators expect to read it.
pub fn timeval_user_friendly(sec: u64, usec: u64) -> String {
    let dt = OffsetDateTime::from_unix_timestamp(sec as i64)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        usec
    )
}
