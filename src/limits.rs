use chrono::NaiveDate;

/// Listing ids accepted by one batch query.
pub const MAX_BATCH_LISTINGS: usize = 1_000;

/// Longest stay a single reservation may cover, in days.
pub const MAX_RESERVATION_DAYS: i64 = 366;

pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_GUEST_FIELD_LEN: usize = 256;
pub const MAX_URL_LEN: usize = 2_048;

/// Largest WAL record accepted on replay. Bigger length headers are corruption.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;

/// Distinct ranges cached per listing.
pub const MAX_CACHED_RANGES_PER_LISTING: usize = 256;

/// Listings with cached answers; new listings are not cached past this.
pub const MAX_CACHED_LISTINGS: usize = 10_000;

/// Oldest and newest dates the engine accepts.
pub const MIN_VALID_DATE: NaiveDate = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
pub const MAX_VALID_DATE: NaiveDate = NaiveDate::from_ymd_opt(9999, 12, 30).unwrap();
