// SPDX-License-Identifier: MIT

//! Display adapter for `Option<T>`, handy in `tracing` fields
//!
//! ```
//! use vbft_util_fmt_opt::AsFmtOption as _;
//!
//! assert_eq!(Some(3).fmt_option().to_string(), "3");
//! assert_eq!(None::<u32>.fmt_option().to_string(), "-");
//! ```

use std::fmt;

pub struct FmtOption<'a, T>(Option<&'a T>);

impl<T> fmt::Display for FmtOption<'_, T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => v.fmt(f),
            None => f.write_str("-"),
        }
    }
}

pub trait AsFmtOption {
    type Item;

    fn fmt_option(&self) -> FmtOption<'_, Self::Item>;
}

impl<T> AsFmtOption for Option<T>
where
    T: fmt::Display,
{
    type Item = T;

    fn fmt_option(&self) -> FmtOption<'_, T> {
        FmtOption(self.as_ref())
    }
}
