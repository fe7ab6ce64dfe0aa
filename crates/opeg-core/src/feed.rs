/// Read-only view of the measurement averages consumed by stabilization.
///
/// Averages are in micro units and `None` means "not enough data";
/// callers must skip rather than substitute zero.
pub trait PriceFeed {
    /// Currencies the feed currently holds observations for
    fn currencies(&self) -> Vec<String>;

    /// Gaussian-filtered water price over the trailing `days`
    fn average_water_price(&self, currency: &str, days: u64, now: u64) -> Option<u64>;

    /// Gaussian-filtered exchange rate `from`/`to` over the trailing `days`
    fn average_exchange_rate(&self, from: &str, to: &str, days: u64, now: u64) -> Option<u64>;
}
