//! Cache domain - backend-agnostic caching contract

mod clock;
mod driver;
mod entry;
mod epoch;
mod key;
mod settings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{resolve_duration, CacheDriver, CacheExt, CleanType, DriverKind};
pub use entry::CacheEntry;
pub use epoch::{parse_epoch, EpochStore, InvalidationEpoch};
pub use key::{KeyNormalizer, DEFAULT_MAX_KEY_LEN, MEMCACHED_MAX_KEY_LEN, SQL_MAX_KEY_LEN};
pub use settings::{InputType, SettingField, SettingsForm};

#[cfg(test)]
pub use clock::MockClock;
#[cfg(test)]
pub use driver::mock::MockDriver;
