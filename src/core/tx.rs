/// Render a base-unit amount in display units with `shown` fractional digits.
///
/// Integer only; digits past `shown` are truncated. Comparisons never go
/// through this, it exists for alert messages.
pub fn format_units(value: u128, decimals: u32, shown: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    let frac = value % scale;
    if shown == 0 {
        return whole.to_string();
    }
    let shown = shown.min(decimals);
    let frac = frac / 10u128.pow(decimals - shown);
    format!("{whole}.{frac:0width$}", width = shown as usize)
}

/// Satoshis as BTC with all 8 decimals.
pub fn format_btc(sats: u128) -> String {
    format_units(sats, 8, 8)
}

/// Wei as ETH with 6 decimals.
pub fn format_eth(wei: u128) -> String {
    format_units(wei, 18, 6)
}
