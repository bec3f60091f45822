// rate.rs - Pulse costs, per-band budget requests and balance tracking
//
// All bit quantities here are in 1/8 bit (BITRES) units unless named
// otherwise.
use crate::cwrs::CwrsTable;
use crate::mathops::log2_frac;
use crate::mode::Mode;

pub use crate::range_coder::BITRES;

/// Per-coefficient overhead reserved before any bits go to the stereo angle.
pub const QTHETA_OFFSET: i32 = 20;

/// Eighth-bits charged on top of the estimate for every range-coded symbol;
/// `tell_frac()` may advance one more than a symbol's estimated cost.
pub const SYMBOL_SLACK: i32 = 1;

/// Cost of every pulse count a band of one width can carry.
#[derive(Debug, Clone)]
pub struct PulseCache {
    costs: Vec<i32>,
}

impl PulseCache {
    pub fn new(table: &CwrsTable, n: usize) -> Self {
        let max_k = table.max_pulses(n);
        let costs = (0..=max_k)
            .map(|k| {
                if k == 0 {
                    0
                } else {
                    log2_frac(table.count(n, k) as u32, BITRES as i32)
                }
            })
            .collect();
        Self { costs }
    }

    pub fn max_pulses(&self) -> usize {
        self.costs.len() - 1
    }

    pub fn pulses_to_bits(&self, k: usize) -> i32 {
        self.costs[k.min(self.max_pulses())]
    }

    /// Pulse count whose cost is closest to `bits`, preferring fewer pulses
    /// on ties.
    pub fn bits_to_pulses(&self, bits: i32) -> usize {
        if bits <= 0 {
            return 0;
        }
        let mut best = 0;
        let mut best_err = bits;
        for (k, &cost) in self.costs.iter().enumerate().skip(1) {
            let err = (cost - bits).abs();
            if err < best_err {
                best = k;
                best_err = err;
            }
            if cost > bits {
                break;
            }
        }
        best
    }

    /// Lower `k` until its cost plus `overhead` fits in `remaining`.
    pub fn fit(&self, mut k: usize, overhead: i32, remaining: i32) -> usize {
        while k > 0 && self.pulses_to_bits(k) + overhead > remaining {
            k -= 1;
        }
        k
    }
}

/// Budget view handed to a band before it is coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandBudget {
    /// `tell_frac()` observed before the band.
    pub tell: i32,
    /// Bits left in the frame after this point, minus one.
    pub remaining: i32,
    /// Share of the carried balance this band may use.
    pub balance_share: i32,
}

/// Carries surplus or deficit from band to band within one frame.
#[derive(Debug, Clone)]
pub struct BalanceTracker {
    balance: i32,
    total: i32,
    nb_bands: usize,
}

impl BalanceTracker {
    /// `total_bits` is the frame budget in whole bits.
    pub fn new(total_bits: i32, nb_bands: usize) -> Self {
        Self {
            balance: 0,
            total: total_bits << BITRES,
            nb_bands,
        }
    }

    pub fn balance(&self) -> i32 {
        self.balance
    }

    pub fn begin_band(&mut self, band: usize, tell: i32) -> BandBudget {
        if band != 0 {
            self.balance -= tell;
        }
        let divisor = (self.nb_bands - band).min(3) as i32;
        BandBudget {
            tell,
            remaining: self.total - tell - 1,
            balance_share: self.balance / divisor,
        }
    }

    pub fn end_band(&mut self, request: i32, budget: &BandBudget) {
        self.balance += request + budget.tell;
    }
}

/// Per-band requests (1/8 bit) for a frame of `total_bits` whole bits,
/// interpolated between the two template rows bracketing the budget.
pub fn compute_allocation(mode: &Mode, total_bits: i32) -> Vec<i32> {
    let nb = mode.nb_bands();
    let channels = mode.channels() as i32;
    let budget = total_bits.max(0) << BITRES;
    let row_bits = |row: usize| -> Vec<i32> {
        (0..nb)
            .map(|band| {
                let n = mode.band_width(band) as i32;
                ((mode.alloc_rows()[row][band] as i32 * n * channels) << BITRES) >> 5
            })
            .collect()
    };
    let rows = mode.alloc_rows().len();
    if rows == 1 {
        return row_bits(0);
    }

    let (mut lo, mut hi) = (0, rows - 1);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if row_bits(mid).iter().sum::<i32>() > budget {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    let bits_lo = row_bits(lo);
    let bits_hi = row_bits(hi);
    let blend = |step: i32| -> Vec<i32> {
        bits_lo
            .iter()
            .zip(&bits_hi)
            .map(|(&l, &h)| (h * step + l * (64 - step)) >> 6)
            .collect()
    };

    let (mut step_lo, mut step_hi) = (0, 64);
    for _ in 0..6 {
        let mid = (step_lo + step_hi) / 2;
        if blend(mid).iter().sum::<i32>() > budget {
            step_hi = mid;
        } else {
            step_lo = mid;
        }
    }
    let pulses = blend(step_lo);
    log::trace!(
        "allocation: rows {lo}/{hi} step {step_lo}/64, {} of {budget} eighth-bits requested",
        pulses.iter().sum::<i32>()
    );
    pulses
}
