//! Duty-cycle budget calculations.
//!
//! Regulation caps the fraction of slots a node may transmit in, measured
//! over a moving window. The allocator splits that budget between the shared
//! channel and the point-to-point links, and translates the share a new link
//! receives into the minimum period exponent it may use: a link with period
//! `n` transmits every `10 * 2^n` slots, so its budget contribution is
//! `1 / (10 * 2^n)`.

use alloc::vec::Vec;

use crate::config::DutyCycleStrategy;
use crate::moving_average::MovingAverage;
use crate::{Error, Result};

/// Minimum leftover budget considered sufficient for a new link.
const MIN_REMAINING_BUDGET: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct DutyCycle {
    max_duty_cycle: f64,
    min_num_supported_pp_links: u32,
    usage: MovingAverage,
    strategy: DutyCycleStrategy,
}

impl DutyCycle {
    pub fn new(period: u32, max_duty_cycle: f64, min_num_supported_pp_links: u32) -> Self {
        DutyCycle {
            max_duty_cycle,
            min_num_supported_pp_links: min_num_supported_pp_links.max(1),
            usage: MovingAverage::new(period as usize),
            strategy: DutyCycleStrategy::Static,
        }
    }

    /// Reports the number of transmissions of the closing slot.
    pub fn report_num_transmissions(&mut self, num_txs: u32) {
        self.usage.put(num_txs as f64);
    }

    /// The currently measured duty cycle.
    pub fn get(&self) -> f64 {
        self.usage.get()
    }

    /// Whether a full measurement window has been collected.
    pub fn should_emit_statistic(&self) -> bool {
        self.usage.has_filled_window()
    }

    pub fn total_budget(&self) -> f64 {
        self.max_duty_cycle
    }

    pub fn strategy(&self) -> DutyCycleStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: DutyCycleStrategy) {
        self.strategy = strategy;
    }

    pub fn min_num_supported_pp_links(&self) -> u32 {
        self.min_num_supported_pp_links
    }

    pub fn set_min_num_supported_pp_links(&mut self, n: u32) {
        self.min_num_supported_pp_links = n.max(1);
    }

    /// Smallest period exponent whose contribution `1 / (10 * 2^n)` fits the
    /// given budget.
    fn period_for_budget(budget: f64) -> u8 {
        let mut n = 0u8;
        while ((10u64 << n) as f64) * budget < 1.0 && n < 32 {
            n += 1;
        }
        n
    }

    /// The budget contribution of a link with the given period exponent.
    pub fn contribution_of_period(period: u8) -> f64 {
        1.0 / (10u64 << period) as f64
    }

    /// Determines the earliest slot offset and minimum period exponent a new
    /// PP link may use.
    ///
    /// `used_pp_budgets` and `pp_timeouts` describe the running PP links
    /// (budget contribution and slots until expiry); `used_sh_budget` and
    /// `sh_slot_offset` describe the shared-channel access, which the dynamic
    /// strategy treats as one more expiring link when its next access is
    /// known (non-negative offset).
    pub fn pp_min_offset_and_period(
        &self,
        used_pp_budgets: &[f64],
        pp_timeouts: &[i32],
        used_sh_budget: f64,
        sh_slot_offset: i32,
    ) -> Result<(i32, u8)> {
        match self.strategy {
            DutyCycleStrategy::Static => Ok(self.pp_static()),
            DutyCycleStrategy::Dynamic => {
                self.pp_dynamic(used_pp_budgets, pp_timeouts, used_sh_budget, sh_slot_offset)
            }
        }
    }

    fn pp_static(&self) -> (i32, u8) {
        let avail = self.max_duty_cycle / (self.min_num_supported_pp_links as f64 + 1.0);
        (0, Self::period_for_budget(avail))
    }

    fn pp_dynamic(
        &self,
        used_pp_budgets: &[f64],
        pp_timeouts: &[i32],
        used_sh_budget: f64,
        sh_slot_offset: i32,
    ) -> Result<(i32, u8)> {
        let fair_share = self.max_duty_cycle / (self.min_num_supported_pp_links as f64 + 1.0);
        let mut avail = self.max_duty_cycle;
        // the SH always keeps at least its fair share reserved once the last
        // supported PP link is being established
        let num_active_links = used_pp_budgets.len() as u32;
        if num_active_links + 1 >= self.min_num_supported_pp_links && used_sh_budget < fair_share {
            avail -= fair_share;
        } else {
            avail -= used_sh_budget;
        }
        for budget in used_pp_budgets {
            avail -= budget;
        }
        let mut min_offset = 0;
        if avail < MIN_REMAINING_BUDGET {
            // walk the expiries in order until enough budget has been freed
            let mut budgets: Vec<f64> = used_pp_budgets.to_vec();
            let mut timeouts: Vec<i32> = pp_timeouts.to_vec();
            if sh_slot_offset >= 0 {
                budgets.push(used_sh_budget);
                timeouts.push(sh_slot_offset);
            }
            while avail < MIN_REMAINING_BUDGET && !timeouts.is_empty() {
                let i = timeouts
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, &t)| t)
                    .map(|(i, _)| i)
                    .unwrap();
                avail += budgets.swap_remove(i);
                min_offset = timeouts.swap_remove(i) + 1;
            }
        }
        if avail >= MIN_REMAINING_BUDGET {
            Ok((min_offset, Self::period_for_budget(avail)))
        } else {
            Err(Error::NoBudgetLeft)
        }
    }

    /// The budget available to the shared channel.
    pub fn sh_budget(&self, used_pp_budgets: &[f64]) -> Result<f64> {
        match self.strategy {
            DutyCycleStrategy::Static => {
                Ok(self.max_duty_cycle / (self.min_num_supported_pp_links as f64 + 1.0))
            }
            DutyCycleStrategy::Dynamic => {
                let mut avail = self.max_duty_cycle;
                for budget in used_pp_budgets {
                    avail -= budget;
                }
                if avail <= MIN_REMAINING_BUDGET {
                    return Err(Error::NoBudgetLeft);
                }
                // keep headroom to establish the next supported PP link
                if (used_pp_budgets.len() as u32) < self.min_num_supported_pp_links {
                    avail -= self.max_duty_cycle / (self.min_num_supported_pp_links as f64 + 1.0);
                }
                Ok(avail)
            }
        }
    }

    /// Minimum slot offset between shared-channel accesses so the SH budget
    /// is maintained: `max(1, ceil(1 / budget))`.
    pub fn sh_offset(&self, used_pp_budgets: &[f64]) -> Result<i32> {
        let budget = self.sh_budget(used_pp_budgets)?;
        let mut offset = (1.0 / budget) as i32;
        if (offset as f64) * budget < 1.0 {
            offset += 1;
        }
        Ok(offset.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_strategy_splits_budget_evenly() {
        // d_max = 0.1, k = 4: every share is 0.02, so the period must satisfy
        // 1/(10 * 2^n) <= 0.02 => n = 3
        let dc = DutyCycle::new(100, 0.1, 4);
        let (min_offset, period) = dc.pp_min_offset_and_period(&[], &[], 0.0, -1).unwrap();
        assert_eq!(min_offset, 0);
        assert_eq!(period, 3);
        assert!((dc.sh_budget(&[]).unwrap() - 0.02).abs() < 1e-12);
        assert_eq!(dc.sh_offset(&[]).unwrap(), 50);
    }

    #[test]
    fn period_for_budget_is_monotonic() {
        assert_eq!(DutyCycle::period_for_budget(0.1), 0);
        assert_eq!(DutyCycle::period_for_budget(0.05), 1);
        assert_eq!(DutyCycle::period_for_budget(0.025), 2);
        assert_eq!(DutyCycle::period_for_budget(0.0125), 3);
        assert!((DutyCycle::contribution_of_period(3) - 0.0125).abs() < 1e-12);
    }

    #[test]
    fn dynamic_grants_period_zero_while_budget_remains() {
        let mut dc = DutyCycle::new(100, 0.5, 2);
        dc.set_strategy(DutyCycleStrategy::Dynamic);
        let (min_offset, period) =
            dc.pp_min_offset_and_period(&[0.1], &[100], 0.05, 20).unwrap();
        assert_eq!(min_offset, 0);
        assert_eq!(period, 0);
    }

    #[test]
    fn dynamic_defers_until_a_link_expires() {
        let mut dc = DutyCycle::new(100, 0.1, 1);
        dc.set_strategy(DutyCycleStrategy::Dynamic);
        // one link eats almost the whole budget; its expiry at +40 frees it
        let (min_offset, _) =
            dc.pp_min_offset_and_period(&[0.09], &[40], 0.0, -1).unwrap();
        assert_eq!(min_offset, 41);
    }

    #[test]
    fn dynamic_fails_without_any_future_budget() {
        let mut dc = DutyCycle::new(100, 0.011, 1);
        dc.set_strategy(DutyCycleStrategy::Dynamic);
        // no running link to expire and the SH share already exhausts the cap
        let result = dc.pp_min_offset_and_period(&[], &[], 0.002, -1);
        assert_eq!(result, Err(Error::NoBudgetLeft));
    }

    #[test]
    fn usage_measurement() {
        let mut dc = DutyCycle::new(4, 0.1, 1);
        assert!(!dc.should_emit_statistic());
        for _ in 0..4 {
            dc.report_num_transmissions(1);
        }
        assert!(dc.should_emit_statistic());
        assert!((dc.get() - 1.0).abs() < 1e-12);
        dc.report_num_transmissions(0);
        assert!((dc.get() - 0.75).abs() < 1e-12);
    }
}
