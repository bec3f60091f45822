// mode.rs - Immutable per-session band layout and allocation template
use crate::config::ModeConfig;
use crate::cwrs::{CwrsTable, MAX_PULSES};
use crate::error::{CodecError, Result};
use crate::rate::PulseCache;

/// Band edges of the 5 ms layout, in 200 Hz bins.
pub static EBAND_5MS: [usize; 22] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40, 48, 60, 78, 100,
];

/// Critical band edges in Hz covering 0-20 kHz.
pub static BARK_FREQ: [u32; 26] = [
    0, 100, 200, 300, 400, 510, 630, 770, 920, 1080, 1270, 1480, 1720, 2000, 2320, 2700, 3150,
    3700, 4400, 5300, 6400, 7700, 9500, 12000, 15500, 20000,
];

pub const ALLOC_ROWS: usize = 14;

/// Allocation template over the 5 ms bands in 1/32 bit per sample.
pub static BAND_ALLOCATION: [[u8; 21]; ALLOC_ROWS] = [
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [90, 90, 75, 70, 60, 50, 45, 40, 35, 30, 30, 25, 15, 1, 0, 0, 0, 0, 0, 0, 0],
    [125, 125, 106, 86, 75, 71, 66, 53, 44, 40, 37, 33, 29, 26, 23, 20, 1, 0, 0, 0, 0],
    [131, 131, 115, 105, 95, 80, 65, 55, 47, 44, 41, 39, 37, 36, 36, 33, 16, 1, 1, 0, 0],
    [135, 135, 118, 109, 99, 84, 70, 66, 56, 53, 51, 49, 48, 47, 46, 44, 25, 20, 15, 5, 0],
    [140, 140, 123, 114, 105, 89, 78, 75, 65, 62, 60, 58, 57, 54, 53, 50, 43, 41, 39, 31, 9],
    [147, 147, 130, 121, 111, 97, 86, 82, 73, 67, 64, 63, 62, 59, 58, 56, 49, 46, 43, 35, 14],
    [155, 155, 138, 129, 119, 106, 94, 90, 77, 72, 69, 67, 67, 62, 62, 59, 52, 48, 48, 39, 19],
    [166, 166, 149, 138, 128, 115, 103, 99, 84, 78, 76, 74, 73, 68, 68, 66, 59, 54, 52, 43, 22],
    [175, 175, 160, 151, 142, 129, 117, 112, 96, 88, 85, 83, 82, 82, 82, 79, 72, 68, 62, 49, 24],
    [177, 177, 163, 157, 151, 139, 131, 129, 113, 106, 104, 103, 102, 98, 98, 95, 87, 82, 77, 61, 27],
    [188, 188, 173, 166, 160, 149, 142, 140, 126, 120, 118, 118, 118, 115, 113, 110, 101, 96, 93, 78, 31],
    [191, 191, 176, 169, 167, 161, 155, 157, 146, 145, 145, 144, 144, 140, 137, 132, 122, 116, 111, 97, 35],
    [202, 202, 192, 188, 191, 192, 192, 194, 188, 187, 186, 185, 184, 182, 183, 179, 168, 163, 167, 156, 41],
];

/// Band layout, channel count and allocation template shared by every frame
/// of a stream.
#[derive(Debug, Clone)]
pub struct Mode {
    e_bands: Vec<usize>,
    channels: usize,
    frame_size: usize,
    pitch_end: usize,
    alloc_rows: Vec<Vec<u8>>,
    cwrs: CwrsTable,
    pulse_caches: Vec<PulseCache>,
}

impl Mode {
    /// Build a mode from an explicit descriptor.
    ///
    /// `e_bands` holds the N+1 band edges in bins, `alloc_rows` one template
    /// row per quality step with one entry (1/32 bit per sample) per band.
    pub fn new(
        e_bands: Vec<usize>,
        channels: usize,
        frame_size: usize,
        pitch_end: usize,
        alloc_rows: Vec<Vec<u8>>,
    ) -> Result<Self> {
        if channels == 0 || channels > 2 {
            return Err(CodecError::UnsupportedChannels(channels));
        }
        if e_bands.len() < 2 {
            return Err(CodecError::InvalidMode("at least one band is required".to_string()));
        }
        if e_bands[0] != 0 {
            return Err(CodecError::InvalidMode(format!(
                "first band edge must be 0, got {}",
                e_bands[0]
            )));
        }
        if let Some(w) = e_bands.windows(2).find(|w| w[1] <= w[0]) {
            return Err(CodecError::InvalidMode(format!(
                "band edges not strictly increasing at {} -> {}",
                w[0], w[1]
            )));
        }
        let last = e_bands[e_bands.len() - 1];
        if last > frame_size {
            return Err(CodecError::InvalidMode(format!(
                "last band edge {last} beyond frame size {frame_size}"
            )));
        }
        if pitch_end > frame_size {
            return Err(CodecError::InvalidMode(format!(
                "pitch end {pitch_end} beyond frame size {frame_size}"
            )));
        }
        let nb = e_bands.len() - 1;
        if alloc_rows.is_empty() || alloc_rows.iter().any(|row| row.len() != nb) {
            return Err(CodecError::InvalidMode(format!(
                "allocation template must have rows of {nb} entries"
            )));
        }

        let max_width = e_bands.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(1);
        let cwrs = CwrsTable::new(max_width, MAX_PULSES);
        let pulse_caches = e_bands
            .windows(2)
            .map(|w| PulseCache::new(&cwrs, w[1] - w[0]))
            .collect();

        log::debug!(
            "mode: {nb} bands over {last}/{frame_size} bins, {channels} channel(s), pitch end {pitch_end}"
        );
        Ok(Self {
            e_bands,
            channels,
            frame_size,
            pitch_end,
            alloc_rows,
            cwrs,
            pulse_caches,
        })
    }

    /// Derive the band layout and allocation template for a sample rate and
    /// frame size.
    pub fn from_config(config: &ModeConfig) -> Result<Self> {
        config.validate()?;
        let res = ((config.sample_rate as usize + config.frame_size) / (2 * config.frame_size)).max(1);
        let e_bands = compute_ebands(config.sample_rate, config.frame_size, res);
        let alloc_rows = if config.sample_rate as usize == 400 * config.frame_size {
            BAND_ALLOCATION.iter().map(|row| row.to_vec()).collect()
        } else {
            interpolate_allocation(&e_bands, res)
        };
        Self::new(
            e_bands,
            config.channels,
            config.frame_size,
            config.pitch_end_bin(),
            alloc_rows,
        )
    }

    pub fn e_bands(&self) -> &[usize] {
        &self.e_bands
    }

    pub fn nb_bands(&self) -> usize {
        self.e_bands.len() - 1
    }

    pub fn band_width(&self, band: usize) -> usize {
        self.e_bands[band + 1] - self.e_bands[band]
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn pitch_end(&self) -> usize {
        self.pitch_end
    }

    /// Last coded bin; everything above it is zero.
    pub fn coded_bins(&self) -> usize {
        self.e_bands[self.nb_bands()]
    }

    pub fn alloc_rows(&self) -> &[Vec<u8>] {
        &self.alloc_rows
    }

    pub fn cwrs(&self) -> &CwrsTable {
        &self.cwrs
    }

    pub fn pulse_cache(&self, band: usize) -> &PulseCache {
        &self.pulse_caches[band]
    }
}

/// Band edges following the critical bands, with 1-bin bands where the
/// critical bands are narrower than a bin.
fn compute_ebands(sample_rate: u32, frame_size: usize, res: usize) -> Vec<usize> {
    if sample_rate as usize == 400 * frame_size {
        return EBAND_5MS.to_vec();
    }
    let bark = |i: usize| BARK_FREQ[i] as i64;
    let res_i = res as i64;
    let bark_bands = BARK_FREQ.len() - 1;

    let mut n_bark = 1;
    while n_bark < bark_bands && bark(n_bark + 1) * 2 < sample_rate as i64 {
        n_bark += 1;
    }
    let mut lin = 0;
    while lin < n_bark && bark(lin + 1) - bark(lin) < res_i {
        lin += 1;
    }

    let low = ((bark(lin) + res_i / 2) / res_i) as usize;
    let high = n_bark - lin;
    let nb = low + high;
    let mut e = vec![0i64; nb + 1];
    for (i, edge) in e.iter_mut().enumerate().take(low) {
        *edge = i as i64;
    }
    let mut offset = if low > 0 && lin > 0 {
        e[low - 1] * res_i - bark(lin - 1)
    } else {
        0
    };
    for i in 0..high {
        let target = bark(lin + i);
        e[i + low] = (target + (offset + res_i) / 2) / res_i;
        offset = e[i + low] * res_i - target;
    }
    for (i, edge) in e.iter_mut().enumerate().take(nb) {
        if *edge < i as i64 {
            *edge = i as i64;
        }
    }
    e[nb] = ((bark(n_bark) + res_i / 2) / res_i).min(frame_size as i64);
    for i in 1..nb.saturating_sub(1) {
        if e[i + 1] - e[i] < e[i] - e[i - 1] {
            e[i] -= (2 * e[i] - e[i - 1] - e[i + 1]) / 2;
        }
    }
    e.into_iter().map(|v| v.max(0) as usize).collect()
}

/// Resample the 5 ms allocation template onto an arbitrary band layout by
/// frequency overlap.
fn interpolate_allocation(e_bands: &[usize], res: usize) -> Vec<Vec<u8>> {
    let nb = e_bands.len() - 1;
    let res = res as i64;
    let edge_hz = |band: usize| e_bands[band] as i64 * res;
    let width = |band: usize| (e_bands[band + 1] - e_bands[band]) as i64;

    BAND_ALLOCATION
        .iter()
        .map(|template| {
            let mut row = vec![0u8; nb];
            let mut current = 0i64;
            let mut eband = 0;
            for (j, &alloc_5ms) in template.iter().enumerate() {
                let mut alloc = if eband < nb {
                    (alloc_5ms as i64 * width(eband)) << 4
                } else {
                    0
                };
                let mut low = EBAND_5MS[j] as i64 * 200;
                let high = EBAND_5MS[j + 1] as i64 * 200;
                while eband < nb && edge_hz(eband + 1) <= high {
                    let edge = edge_hz(eband + 1);
                    let n = width(eband);
                    let den = high - low;
                    let bits = if den > 0 {
                        (2 * alloc * (edge - low) + den) / (2 * den)
                    } else {
                        0
                    };
                    row[eband] = ((2 * (current + bits) + (n << 4)) / (n << 5)).min(255) as u8;
                    low = edge;
                    alloc -= bits;
                    current = 0;
                    eband += 1;
                }
                current += alloc;
            }
            if eband < nb {
                let n = width(eband);
                row[eband] = ((2 * current + (n << 4)) / (n << 5)).min(255) as u8;
            }
            row
        })
        .collect()
}
