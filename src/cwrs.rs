// cwrs.rs - Combinatorial indexing of pulse vectors
//
// A codeword of length N with K pulses is an integer vector whose absolute
// values sum to K. V(N,K) counts them; codewords are ordered by the magnitude
// of the leading coordinate, then its sign (positive first), then the tail.
use crate::error::{CodecError, Result};

/// Largest pulse count a single vector may carry.
pub const MAX_PULSES: usize = 128;

/// Table of V(n,k) for every n up to the widest band of a mode.
#[derive(Debug, Clone)]
pub struct CwrsTable {
    max_n: usize,
    max_k: usize,
    v: Vec<u64>,
}

impl CwrsTable {
    pub fn new(max_n: usize, max_k: usize) -> Self {
        let stride = max_k + 1;
        let mut v = vec![0u64; (max_n + 1) * stride];
        v[0] = 1;
        for n in 1..=max_n {
            v[n * stride] = 1;
            for k in 1..=max_k {
                v[n * stride + k] = v[(n - 1) * stride + k]
                    .saturating_add(v[n * stride + k - 1])
                    .saturating_add(v[(n - 1) * stride + k - 1]);
            }
        }
        Self { max_n, max_k, v }
    }

    /// Number of codewords of length `n` with `k` pulses (saturating).
    #[inline]
    pub fn count(&self, n: usize, k: usize) -> u64 {
        debug_assert!(n <= self.max_n && k <= self.max_k);
        self.v[n * (self.max_k + 1) + k]
    }

    /// Largest pulse count whose codebook size fits in 32 bits.
    pub fn max_pulses(&self, n: usize) -> usize {
        if n == 1 {
            return 1;
        }
        (0..=self.max_k.min(MAX_PULSES))
            .take_while(|&k| self.count(n, k) <= u32::MAX as u64)
            .last()
            .unwrap_or(0)
    }

    fn check(&self, n: usize, k: usize) -> Result<()> {
        if n == 0 || n > self.max_n {
            return Err(CodecError::BufferSizeMismatch {
                expected: self.max_n,
                actual: n,
            });
        }
        if k > self.max_k {
            return Err(CodecError::InvalidConfig(format!(
                "pulse count {k} exceeds table limit {}",
                self.max_k
            )));
        }
        Ok(())
    }

    /// Index of the codeword `y`.
    pub fn index(&self, y: &[i32]) -> Result<u64> {
        let n = y.len();
        let mut k = y.iter().map(|v| v.unsigned_abs() as usize).sum::<usize>();
        self.check(n, k)?;
        let mut index = 0u64;
        for (pos, &value) in y.iter().enumerate() {
            let rest = n - pos - 1;
            let a = value.unsigned_abs() as usize;
            if a > 0 {
                index += self.count(rest, k);
                for m in 1..a {
                    index += 2 * self.count(rest, k - m);
                }
                if value < 0 {
                    index += self.count(rest, k - a);
                }
            }
            k -= a;
        }
        Ok(index)
    }

    /// Codeword of length `y.len()` with `k` pulses at position `index`.
    pub fn codeword(&self, mut index: u64, k: usize, y: &mut [i32]) -> Result<()> {
        let n = y.len();
        self.check(n, k)?;
        let mut k = k;
        for pos in 0..n {
            let rest = n - pos - 1;
            let zeros = self.count(rest, k);
            if index < zeros {
                y[pos] = 0;
                continue;
            }
            index -= zeros;
            let mut a = 1;
            loop {
                if a > k {
                    return Err(CodecError::InvalidConfig(
                        "codeword index out of range".to_string(),
                    ));
                }
                let c = self.count(rest, k - a);
                if index < 2 * c {
                    if index >= c {
                        index -= c;
                        y[pos] = -(a as i32);
                    } else {
                        y[pos] = a as i32;
                    }
                    break;
                }
                index -= 2 * c;
                a += 1;
            }
            k -= a;
        }
        Ok(())
    }
}
