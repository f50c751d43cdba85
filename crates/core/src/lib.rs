pub mod category;
pub mod clock;
pub mod money;
pub mod period;
pub mod store;
pub mod summary;
pub mod transaction;

pub use category::{is_known_category, CatchAllSet, CATCH_ALL_CATEGORIES, CATEGORIES, DEFAULT_CATEGORY};
pub use clock::{Clock, FixedClock, SystemClock};
pub use money::Money;
pub use period::{DateRange, PeriodError, YearMonth};
pub use store::{StoreError, TransactionStore};
pub use summary::{resolve_range, CatchAllPage, LedgerEntry, MonthCategoryBucket, Page, Summary, SummaryReducer};
pub use transaction::{CategorizedTransaction, RawTransactionRow, StoredTransaction};
