use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Full mapping of currency code to rate at one instant.
pub type Snapshot = BTreeMap<String, Decimal>;

/// In-memory projection of the durable rates: code to last known rate.
///
/// Safe for any number of concurrent readers and writers. A batch written
/// with [`RateCache::put_all`] becomes visible to readers all at once.
#[derive(Debug, Default)]
pub struct RateCache {
    rates: RwLock<HashMap<String, Decimal>>,
}

impl RateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &str) -> Option<Decimal> {
        self.rates.read().get(code).copied()
    }

    /// Owned copy of every entry; later writes never show up in it.
    pub fn get_all(&self) -> Snapshot {
        self.rates
            .read()
            .iter()
            .map(|(code, rate)| (code.clone(), *rate))
            .collect()
    }

    pub fn put(&self, code: &str, rate: Decimal) {
        self.rates.write().insert(code.to_string(), rate);
    }

    pub fn put_all<'a>(&self, rates: impl IntoIterator<Item = (&'a String, &'a Decimal)>) {
        let mut map = self.rates.write();
        for (code, rate) in rates {
            map.insert(code.clone(), *rate);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rates.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.rates.read().len()
    }
}
