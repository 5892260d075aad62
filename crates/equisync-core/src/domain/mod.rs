//! Domain values shared by every market run.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Market`] | One of the six supported venues |
//! | [`Symbol`] | Validated provider ticker |
//! | [`PriceRow`] | One validated OHLCV day |
//! | [`FetchWindow`] | Requested history span |

mod market;
mod price;
mod symbol;

pub(crate) use price::format_date;
pub use market::Market;
pub use price::{FetchWindow, PriceRow};
pub use symbol::Symbol;
