// range_coder.rs - Bit-exact range encoder/decoder pair
//
// Interval-coded symbols are written from the front of the buffer, raw bits
// are packed from the back. Both halves keep `nbits_total` in lockstep so the
// encoder and decoder report the same `tell()` after every symbol.
use crate::error::{CodecError, Result};
use crate::mathops::ilog;

pub const SYM_BITS: u32 = 8;
pub const CODE_BITS: u32 = 32;
pub const SYM_MAX: u32 = (1 << SYM_BITS) - 1;
pub const CODE_TOP: u32 = 1 << (CODE_BITS - 1);
pub const CODE_BOT: u32 = CODE_TOP >> SYM_BITS;
pub const CODE_SHIFT: u32 = CODE_BITS - SYM_BITS - 1;
pub const CODE_EXTRA: u32 = (CODE_BITS - 2) % SYM_BITS + 1;
/// Values wider than this are split into an interval-coded head and raw tail.
pub const UINT_BITS: u32 = 8;
const WINDOW_SIZE: u32 = 32;
/// Fractional resolution of `tell_frac`: 1/8 bit.
pub const BITRES: u32 = 3;

/// Bits consumed so far, identical on the encode and decode side.
pub trait Tell {
    /// Whole bits, rounded up.
    fn tell(&self) -> i32;
    /// 1/8 bits, rounded up.
    fn tell_frac(&self) -> i32;
}

fn tell_whole(nbits_total: i32, rng: u32) -> i32 {
    nbits_total - ilog(rng)
}

fn tell_eighths(nbits_total: i32, rng: u32) -> i32 {
    const CORRECTION: [u32; 8] = [35733, 38967, 42495, 46340, 50535, 55109, 60097, 65535];
    let nbits = nbits_total << BITRES;
    let mut l = ilog(rng);
    let r = rng >> (l - 16);
    let mut b = ((r >> 12) as usize).saturating_sub(8);
    if b < CORRECTION.len() && r > CORRECTION[b] {
        b += 1;
    }
    l = (l << 3) + b as i32;
    nbits - l
}

#[inline]
fn scaled_range(rng: u32, ft: u32) -> u32 {
    rng / ft
}

/// Range encoder owning its output buffer for one frame.
#[derive(Debug)]
pub struct RangeEncoder {
    buf: Vec<u8>,
    offs: u32,
    end_offs: u32,
    end_window: u32,
    nend_bits: u32,
    nbits_total: i32,
    rng: u32,
    val: u32,
    /// Number of buffered 0xFF bytes awaiting a possible carry.
    ext: u32,
    /// Byte held back for carry propagation, -1 before the first one.
    rem: i32,
    fault: Option<CodecError>,
    finished: bool,
}

impl RangeEncoder {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            offs: 0,
            end_offs: 0,
            end_window: 0,
            nend_bits: 0,
            nbits_total: CODE_BITS as i32 + 1,
            rng: CODE_TOP,
            val: 0,
            ext: 0,
            rem: -1,
            fault: None,
            finished: false,
        }
    }

    pub fn storage(&self) -> usize {
        self.buf.len()
    }

    /// Bytes written to the front of the buffer so far.
    pub fn range_bytes(&self) -> usize {
        self.offs as usize
    }

    pub fn fault(&self) -> Option<&CodecError> {
        self.fault.as_ref()
    }

    fn record(&mut self, err: CodecError) {
        if self.fault.is_none() {
            log::error!("range encoder fault: {err}");
            self.fault = Some(err);
        }
    }

    fn storage_u32(&self) -> u32 {
        self.buf.len() as u32
    }

    fn write_byte(&mut self, value: u32) {
        if self.offs + self.end_offs >= self.storage_u32() {
            self.record(CodecError::BufferExhausted);
            return;
        }
        self.buf[self.offs as usize] = value as u8;
        self.offs += 1;
    }

    fn write_byte_at_end(&mut self, value: u32) {
        if self.offs + self.end_offs >= self.storage_u32() {
            self.record(CodecError::BufferExhausted);
            return;
        }
        self.end_offs += 1;
        let idx = (self.storage_u32() - self.end_offs) as usize;
        self.buf[idx] = value as u8;
    }

    fn carry_out(&mut self, c: u32) {
        if c == SYM_MAX {
            match self.ext.checked_add(1) {
                Some(ext) => self.ext = ext,
                None => self.record(CodecError::CarryOverflow),
            }
            return;
        }
        let carry = c >> SYM_BITS;
        if self.rem >= 0 {
            self.write_byte(self.rem as u32 + carry);
        }
        if self.ext > 0 {
            let sym = (SYM_MAX + carry) & SYM_MAX;
            while self.ext > 0 {
                self.write_byte(sym);
                self.ext -= 1;
            }
        }
        self.rem = (c & SYM_MAX) as i32;
    }

    fn normalize(&mut self) {
        while self.rng <= CODE_BOT {
            self.carry_out(self.val >> CODE_SHIFT);
            self.val = (self.val << SYM_BITS) & (CODE_TOP - 1);
            self.rng <<= SYM_BITS;
            self.nbits_total += SYM_BITS as i32;
        }
    }

    /// Narrow the interval to `[fl, fh)` out of `ft`.
    pub fn encode(&mut self, fl: u32, fh: u32, ft: u32) {
        debug_assert!(fl < fh && fh <= ft);
        self.narrow(scaled_range(self.rng, ft), fl, fh, ft);
    }

    /// [`encode`](Self::encode) with a total of `1 << bits`, scaled by shift.
    pub fn encode_bin(&mut self, fl: u32, fh: u32, bits: u32) {
        debug_assert!(bits > 0 && bits < 16);
        let ft = 1 << bits;
        debug_assert!(fl < fh && fh <= ft);
        self.narrow(self.rng >> bits, fl, fh, ft);
    }

    fn narrow(&mut self, r: u32, fl: u32, fh: u32, ft: u32) {
        if fl > 0 {
            self.val = self
                .val
                .wrapping_add(self.rng.wrapping_sub(r.wrapping_mul(ft - fl)));
            self.rng = r.wrapping_mul(fh - fl);
        } else {
            self.rng = self.rng.wrapping_sub(r.wrapping_mul(ft - fh));
        }
        self.normalize();
    }

    /// Encode `value` uniformly distributed over `0..ft`.
    pub fn encode_uint(&mut self, value: u32, ft: u32) {
        debug_assert!(ft > 1 && value < ft);
        let ft = ft - 1;
        let mut ftb = ilog(ft) as u32;
        if ftb > UINT_BITS {
            ftb -= UINT_BITS;
            let head = value >> ftb;
            self.encode(head, head + 1, (ft >> ftb) + 1);
            self.encode_raw_bits(value & ((1 << ftb) - 1), ftb);
        } else {
            self.encode(value, value + 1, ft + 1);
        }
    }

    /// Pack `nbits` raw bits at the tail of the buffer.
    pub fn encode_raw_bits(&mut self, value: u32, nbits: u32) {
        debug_assert!(nbits > 0 && nbits <= 25);
        let mut window = self.end_window;
        let mut used = self.nend_bits;
        if used + nbits > WINDOW_SIZE {
            while used >= SYM_BITS {
                self.write_byte_at_end(window & SYM_MAX);
                window >>= SYM_BITS;
                used -= SYM_BITS;
            }
        }
        window |= value << used;
        used += nbits;
        self.end_window = window;
        self.nend_bits = used;
        self.nbits_total += nbits as i32;
    }

    /// Flush the final interval and zero-pad the gap between the two ends.
    pub fn done(&mut self) -> Result<()> {
        if self.finished {
            return self.fault.clone().map_or(Ok(()), Err);
        }
        self.finished = true;

        let mut window = self.end_window;
        let mut used = self.nend_bits as i32;
        let mut l = CODE_BITS as i32 - ilog(self.rng);
        let mut msk = (CODE_TOP - 1) >> l;
        let mut end = (self.val.wrapping_add(msk)) & !msk;
        if (end | msk) >= self.val.wrapping_add(self.rng) {
            l += 1;
            msk >>= 1;
            end = (self.val.wrapping_add(msk)) & !msk;
        }
        while l > 0 {
            self.carry_out(end >> CODE_SHIFT);
            end = (end << SYM_BITS) & (CODE_TOP - 1);
            l -= SYM_BITS as i32;
        }
        if self.rem >= 0 || self.ext > 0 {
            self.carry_out(0);
        }
        while used >= SYM_BITS as i32 {
            self.write_byte_at_end(window & SYM_MAX);
            window >>= SYM_BITS;
            used -= SYM_BITS as i32;
        }

        if self.fault.is_none() {
            let start = self.offs as usize;
            let stop = (self.storage_u32() - self.end_offs) as usize;
            self.buf[start..stop].fill(0);
            if used > 0 {
                if self.end_offs >= self.storage_u32() {
                    self.record(CodecError::BufferExhausted);
                } else {
                    // A negative `l` is the number of free bits left in the last flushed byte
                    if self.offs + self.end_offs >= self.storage_u32() && -l < used {
                        self.record(CodecError::BufferExhausted);
                    }
                    let idx = (self.storage_u32() - self.end_offs - 1) as usize;
                    self.buf[idx] |= window as u8;
                }
            }
        }
        self.end_window = window;
        self.nend_bits = used.max(0) as u32;

        match &self.fault {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Finish the frame and hand back the coded bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.done()?;
        Ok(self.buf)
    }
}

impl Tell for RangeEncoder {
    fn tell(&self) -> i32 {
        tell_whole(self.nbits_total, self.rng)
    }

    fn tell_frac(&self) -> i32 {
        tell_eighths(self.nbits_total, self.rng)
    }
}

/// Range decoder reading one frame from a borrowed buffer.
#[derive(Debug)]
pub struct RangeDecoder<'a> {
    buf: &'a [u8],
    offs: usize,
    end_offs: usize,
    end_window: u32,
    nend_bits: u32,
    nbits_total: i32,
    rng: u32,
    val: u32,
    /// Scale of the last `decode_freq`, reused by `update`.
    ext: u32,
    rem: u32,
    corrupt: bool,
}

impl<'a> RangeDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        let mut dec = Self {
            buf,
            offs: 0,
            end_offs: 0,
            end_window: 0,
            nend_bits: 0,
            nbits_total: CODE_BITS as i32 + 1
                - ((CODE_BITS - CODE_EXTRA) / SYM_BITS * SYM_BITS) as i32,
            rng: 1 << CODE_EXTRA,
            val: 0,
            ext: 0,
            rem: 0,
            corrupt: false,
        };
        dec.rem = dec.read_byte();
        dec.val = dec.rng - 1 - (dec.rem >> (SYM_BITS - CODE_EXTRA));
        dec.normalize();
        dec
    }

    /// Set when a uniform integer decoded outside its range.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    fn read_byte(&mut self) -> u32 {
        match self.buf.get(self.offs) {
            Some(&b) => {
                self.offs += 1;
                b as u32
            }
            None => 0,
        }
    }

    fn read_byte_from_end(&mut self) -> u32 {
        if self.end_offs < self.buf.len() {
            self.end_offs += 1;
            self.buf[self.buf.len() - self.end_offs] as u32
        } else {
            0
        }
    }

    fn normalize(&mut self) {
        while self.rng <= CODE_BOT {
            self.nbits_total += SYM_BITS as i32;
            self.rng <<= SYM_BITS;
            let prev = self.rem;
            self.rem = self.read_byte();
            let sym = ((prev << SYM_BITS) | self.rem) >> (SYM_BITS - CODE_EXTRA);
            self.val = ((self.val << SYM_BITS).wrapping_add(SYM_MAX & !sym)) & (CODE_TOP - 1);
        }
    }

    /// Scaled position of the current symbol within `0..ft`.
    pub fn decode_freq(&mut self, ft: u32) -> u32 {
        self.ext = scaled_range(self.rng, ft);
        let s = self.val / self.ext;
        ft - (s + 1).min(ft)
    }

    /// [`decode_freq`](Self::decode_freq) for a total of `1 << bits`.
    pub fn decode_bin(&mut self, bits: u32) -> u32 {
        debug_assert!(bits > 0 && bits < 16);
        let ft = 1 << bits;
        self.ext = self.rng >> bits;
        let s = self.val / self.ext;
        ft - (s + 1).min(ft)
    }

    /// Commit the symbol `[fl, fh)` found from `decode_freq` or `decode_bin`.
    pub fn update(&mut self, fl: u32, fh: u32, ft: u32) {
        let s = self.ext.wrapping_mul(ft - fh);
        self.val = self.val.wrapping_sub(s);
        self.rng = if fl > 0 {
            self.ext.wrapping_mul(fh - fl)
        } else {
            self.rng.wrapping_sub(s)
        };
        self.normalize();
    }

    pub fn decode_uint(&mut self, ft: u32) -> u32 {
        debug_assert!(ft > 1);
        let ft = ft - 1;
        let mut ftb = ilog(ft) as u32;
        if ftb > UINT_BITS {
            ftb -= UINT_BITS;
            let ft_head = (ft >> ftb) + 1;
            let s = self.decode_freq(ft_head);
            self.update(s, s + 1, ft_head);
            let t = (s << ftb) | self.decode_raw_bits(ftb);
            if t <= ft {
                return t;
            }
            self.corrupt = true;
            ft
        } else {
            let s = self.decode_freq(ft + 1);
            self.update(s, s + 1, ft + 1);
            s
        }
    }

    pub fn decode_raw_bits(&mut self, nbits: u32) -> u32 {
        debug_assert!(nbits > 0 && nbits <= 25);
        let mut window = self.end_window;
        let mut available = self.nend_bits;
        if available < nbits {
            while available <= WINDOW_SIZE - SYM_BITS {
                window |= self.read_byte_from_end() << available;
                available += SYM_BITS;
            }
        }
        let value = window & ((1u32 << nbits) - 1);
        window = window.checked_shr(nbits).unwrap_or(0);
        available -= nbits;
        self.end_window = window;
        self.nend_bits = available;
        self.nbits_total += nbits as i32;
        value
    }
}

impl Tell for RangeDecoder<'_> {
    fn tell(&self) -> i32 {
        tell_whole(self.nbits_total, self.rng)
    }

    fn tell_frac(&self) -> i32 {
        tell_eighths(self.nbits_total, self.rng)
    }
}
