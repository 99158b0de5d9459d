use std::time::Duration;

use bincode::{Decode, Encode};
use time::UtcDateTime;
use vbft_util_array_type::array_type_fixed_size_define;

array_type_fixed_size_define! {
    /// Microsecond-precision absolute timestamp, UTC
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct Timestamp(u64);
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from(
            u64::try_from(UtcDateTime::now().unix_timestamp_nanos() / 1000).expect("Can't fail"),
        )
    }

    /// Convert to datetime, if in range
    pub fn to_datetime(self) -> Option<UtcDateTime> {
        UtcDateTime::from_unix_timestamp_nanos(i128::from(self.to_number()) * 1000).ok()
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.to_number().saturating_sub(earlier.to_number()))
    }
}
