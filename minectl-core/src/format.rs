//! Display helpers for observers

use crate::settings::BalanceUnit;

const SPEED_UNITS: [&str; 6] = ["H/s", "kH/s", "MH/s", "GH/s", "TH/s", "PH/s"];

/// Format a hash rate with an SI prefix, e.g. `24.50 MH/s`
pub fn format_speed(hashes_per_second: f64) -> String {
    let mut value = hashes_per_second;
    let mut unit = 0;
    while value.abs() >= 1000.0 && unit < SPEED_UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, SPEED_UNITS[unit])
}

/// Format a speed vector of a (possibly dual) algorithm
pub fn format_speeds(speeds: &[f64]) -> String {
    speeds
        .iter()
        .map(|s| format_speed(*s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format a BTC amount in the given display unit
pub fn format_balance(btc: f64, unit: BalanceUnit) -> String {
    match unit {
        BalanceUnit::Btc => format!("{:.8} BTC", btc),
        BalanceUnit::Mbtc => format!("{:.5} mBTC", btc * 1e3),
        BalanceUnit::Satoshi => format!("{} sat", (btc * 1e8).round() as i64),
    }
}
