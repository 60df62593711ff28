// =============================================================================
// Ladder Walk — volume-maximizing two-leg execution across paired books
// =============================================================================
//
// Given the ask ladder where we would buy and the bid ladder where we would
// sell, walk both in lockstep accumulating volume, cost and revenue, and
// return the prefix with the highest net profit percent (after taker fees on
// both legs) that clears the configured threshold.
//
// Because asks are non-decreasing and bids are non-increasing, each increment
// has a worse marginal spread than the last, so once the cumulative net
// percent drops below the threshold no deeper prefix can recover — the walk
// stops there. The best prefix can still be an earlier one, hence the
// best-so-far record rather than the last.
//
// All arithmetic is plain f64; comparisons use an absolute 1e-9 tolerance.
// Fee percents apply to buy cost and sell revenue separately, uncompounded.
// =============================================================================

use crate::types::PricePoint;

pub const EPS: f64 = 1e-9;

/// Metrics of the best executable prefix found by [`walk_ladders`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderOutcome {
    /// Base-currency volume at the best prefix.
    pub volume_base: f64,
    /// Volume-weighted average buy price.
    pub avg_buy_price: f64,
    /// Volume-weighted average sell price.
    pub avg_sell_price: f64,
    /// Profit percent before fees.
    pub gross_profit_pct: f64,
    /// Profit percent after taker fees on both legs.
    pub net_profit_pct: f64,
    /// Total fees in quote currency.
    pub fees_quote: f64,
    /// Total buy cost in quote currency.
    pub cost_quote: f64,
    /// Total sell revenue in quote currency.
    pub revenue_quote: f64,
}

/// Walk `buy_asks` (ascending) against `sell_bids` (descending), bounded by
/// `max_volume_base`, and return the best prefix whose net profit percent is
/// at least `min_profit_pct`. Returns `None` when no such prefix exists.
pub fn walk_ladders(
    buy_asks: &[PricePoint],
    sell_bids: &[PricePoint],
    min_profit_pct: f64,
    max_volume_base: f64,
    buy_fee_pct: f64,
    sell_fee_pct: f64,
) -> Option<LadderOutcome> {
    if buy_asks.is_empty() || sell_bids.is_empty() || max_volume_base <= EPS {
        return None;
    }

    let mut ia = 0;
    let mut ib = 0;
    let mut volume = 0.0_f64;
    let mut cost = 0.0_f64;
    let mut revenue = 0.0_f64;
    let mut best: Option<LadderOutcome> = None;

    while ia < buy_asks.len() && ib < sell_bids.len() && volume < max_volume_base {
        let ask = buy_asks[ia];
        let bid = sell_bids[ib];
        let remaining = max_volume_base - volume;
        let step = ask.volume.min(bid.volume).min(remaining);

        if step <= EPS {
            if remaining <= EPS {
                break;
            }
            // A degenerate level; move past whichever side is the bottleneck.
            if ask.volume <= bid.volume {
                ia += 1;
            } else {
                ib += 1;
            }
            continue;
        }

        volume += step;
        cost += step * ask.price;
        revenue += step * bid.price;

        let avg_buy_price = cost / volume;
        let avg_sell_price = revenue / volume;
        let gross_profit_pct = (avg_sell_price / avg_buy_price - 1.0) * 100.0;
        let fees_quote = cost * (buy_fee_pct / 100.0) + revenue * (sell_fee_pct / 100.0);
        let net_profit_pct = ((revenue - fees_quote - cost) / cost) * 100.0;

        if net_profit_pct >= min_profit_pct {
            if best.map_or(true, |b| net_profit_pct > b.net_profit_pct) {
                best = Some(LadderOutcome {
                    volume_base: volume,
                    avg_buy_price,
                    avg_sell_price,
                    gross_profit_pct,
                    net_profit_pct,
                    fees_quote,
                    cost_quote: cost,
                    revenue_quote: revenue,
                });
            }
        } else {
            // Marginal spreads only shrink from here; nothing deeper can
            // climb back above the threshold.
            break;
        }

        if (step - ask.volume).abs() <= EPS {
            ia += 1;
        }
        if (step - bid.volume).abs() <= EPS {
            ib += 1;
        }
    }

    best.filter(|b| b.volume_base > EPS)
}
