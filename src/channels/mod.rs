//! Per-channel frequency records, spectral-window aggregates and the
//! channel-contribution entries that link input channels to output channels.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;

/// One spectral channel: where it came from, where it goes, and its extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelInfo {
    pub spw_id: usize,

    /// The index of this channel in its input spectral window.
    pub in_chan: usize,

    /// The index of this channel in the output grid it has been placed on.
    pub out_chan: usize,

    /// The centre frequency \[Hz\].
    pub freq: f64,

    /// \[Hz\]
    pub width: f64,

    pub effective_bw: f64,

    pub resolution: f64,
}

impl ChannelInfo {
    pub fn new(spw_id: usize, in_chan: usize, freq: f64, width: f64) -> ChannelInfo {
        ChannelInfo {
            spw_id,
            in_chan,
            out_chan: in_chan,
            freq,
            width,
            effective_bw: width,
            resolution: width,
        }
    }

    pub fn lower(&self) -> f64 {
        self.freq - self.width / 2.0
    }

    pub fn upper(&self) -> f64 {
        self.freq + self.width / 2.0
    }

    /// The fraction of `other`'s width that is covered by `self`.
    ///
    /// If `self` contains `other`, this is exactly 1. If `other` contains
    /// `self`, this is `self.width / other.width`. Partial overlaps give the
    /// length of the shared interval over `other.width`, and disjoint (or
    /// merely touching) channels give 0.
    pub fn overlap(&self, other: &ChannelInfo) -> f64 {
        if other.width <= 0.0 {
            return 0.0;
        }

        let (s_lo, s_hi) = (self.lower(), self.upper());
        let (o_lo, o_hi) = (other.lower(), other.upper());
        if s_lo <= o_lo && s_hi >= o_hi {
            1.0
        } else if s_lo >= o_lo && s_hi <= o_hi {
            self.width / other.width
        } else if s_lo < o_lo && s_hi > o_lo {
            // `self` sticks out below `other`.
            (s_hi - o_lo) / other.width
        } else if s_lo < o_hi && s_hi > o_hi {
            (o_hi - s_lo) / other.width
        } else {
            0.0
        }
    }

    fn cmp_freq(&self, other: &ChannelInfo) -> Ordering {
        self.freq.total_cmp(&other.freq)
    }
}

/// Sort channels by ascending centre frequency. Channels with identical
/// frequencies keep their relative order.
pub fn sort_by_freq(channels: &mut [ChannelInfo]) {
    // `sort_by` is a stable sort.
    channels.sort_by(ChannelInfo::cmp_freq);
}

/// The contribution of one input channel to one output channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelContribution {
    pub in_spw: usize,
    pub in_chan: usize,
    pub out_chan: usize,

    /// The fraction of the input channel covered by the output channel, in
    /// \[0, 1\].
    pub weight: f64,

    /// `true` if this contribution is live.
    pub flag: bool,
}

impl ChannelContribution {
    pub fn new(in_spw: usize, in_chan: usize, out_chan: usize, weight: f64) -> ChannelContribution {
        ChannelContribution {
            in_spw,
            in_chan,
            out_chan,
            weight,
            flag: true,
        }
    }
}

/// Every non-zero contribution of `inputs` to `outputs`. Both slices are
/// expected to be sorted by frequency; the result is ordered by output
/// channel, then by input position.
pub fn contributions(inputs: &[ChannelInfo], outputs: &[ChannelInfo]) -> Vec<ChannelContribution> {
    let mut contributions = vec![];
    for (i_out, output) in outputs.iter().enumerate() {
        for input in inputs {
            if input.upper() <= output.lower() || input.lower() >= output.upper() {
                continue;
            }
            let weight = output.overlap(input);
            if weight > f64::EPSILON {
                contributions.push(ChannelContribution::new(
                    input.spw_id,
                    input.in_chan,
                    i_out,
                    weight.min(1.0),
                ));
            }
        }
    }
    contributions
}

/// The channel layout of a spectral window together with quantities derived
/// from it. The derived quantities are recomputed by every method that
/// changes the channels, so they can never be stale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpwInfo {
    freqs: Vec<f64>,
    widths: Vec<f64>,
    effective_bw: Vec<f64>,
    resolution: Vec<f64>,

    upper_bound: f64,
    lower_bound: f64,
    total_bandwidth: f64,
    ref_freq: f64,
}

impl SpwInfo {
    /// Frequencies and widths are paired up; any surplus in the longer slice
    /// is ignored.
    pub fn new(freqs: &[f64], widths: &[f64]) -> SpwInfo {
        let mut info = SpwInfo::default();
        info.reset(freqs, widths);
        info
    }

    pub fn from_channels(channels: &[ChannelInfo]) -> SpwInfo {
        let mut info = SpwInfo {
            freqs: channels.iter().map(|c| c.freq).collect(),
            widths: channels.iter().map(|c| c.width).collect(),
            effective_bw: channels.iter().map(|c| c.effective_bw).collect(),
            resolution: channels.iter().map(|c| c.resolution).collect(),
            ..Default::default()
        };
        info.update();
        info
    }

    /// Replace the channels. Effective bandwidths and resolutions are set to
    /// the widths.
    pub fn reset(&mut self, freqs: &[f64], widths: &[f64]) {
        let n = freqs.len().min(widths.len());
        self.freqs = freqs[..n].to_vec();
        self.widths = widths[..n].to_vec();
        self.effective_bw = self.widths.clone();
        self.resolution = self.widths.clone();
        self.update();
    }

    /// Flip the sign of every channel width, as a measurement set does for a
    /// window that runs from high to low frequency.
    pub fn negate_widths(&mut self) {
        for w in self.widths.iter_mut() {
            *w = -*w;
        }
        self.update();
    }

    /// Truncate to, or extend to, `num_chans` channels. Extension continues
    /// the grid with the spacing and width of the last channel.
    pub fn resize(&mut self, num_chans: usize) {
        if num_chans <= self.freqs.len() {
            self.freqs.truncate(num_chans);
            self.widths.truncate(num_chans);
            self.effective_bw.truncate(num_chans);
            self.resolution.truncate(num_chans);
        } else if let (Some(&freq), Some(&width)) = (self.freqs.last(), self.widths.last()) {
            let spacing = match self.freqs.as_slice() {
                [.., a, b] => b - a,
                _ => width,
            };
            for i in 1..=num_chans - self.freqs.len() {
                self.freqs.push(freq + spacing * i as f64);
                self.widths.push(width);
                self.effective_bw.push(width);
                self.resolution.push(width);
            }
        }
        self.update();
    }

    fn update(&mut self) {
        if self.freqs.is_empty() {
            self.upper_bound = 0.0;
            self.lower_bound = 0.0;
            self.total_bandwidth = 0.0;
            self.ref_freq = 0.0;
            return;
        }

        let (lower, upper) = self.freqs.iter().zip(self.widths.iter()).fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), (f, w)| {
                let half = w.abs() / 2.0;
                (lo.min(f - half), hi.max(f + half))
            },
        );
        self.lower_bound = lower;
        self.upper_bound = upper;
        self.total_bandwidth = upper - lower;
        self.ref_freq = self.freqs[0];
    }

    pub fn num_chans(&self) -> usize {
        self.freqs.len()
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    pub fn effective_bw(&self) -> &[f64] {
        &self.effective_bw
    }

    pub fn resolution(&self) -> &[f64] {
        &self.resolution
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound
    }

    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }

    pub fn total_bandwidth(&self) -> f64 {
        self.total_bandwidth
    }

    pub fn ref_freq(&self) -> f64 {
        self.ref_freq
    }

    /// The channels of this window as [`ChannelInfo`]s belonging to
    /// `spw_id`.
    pub fn channels(&self, spw_id: usize) -> Vec<ChannelInfo> {
        (0..self.freqs.len())
            .map(|i| ChannelInfo {
                spw_id,
                in_chan: i,
                out_chan: i,
                freq: self.freqs[i],
                width: self.widths[i],
                effective_bw: self.effective_bw[i],
                resolution: self.resolution[i],
            })
            .collect()
    }

    /// A new window containing the channels in `range`.
    pub fn slice(&self, range: std::ops::Range<usize>) -> SpwInfo {
        let mut info = SpwInfo {
            freqs: self.freqs[range.clone()].to_vec(),
            widths: self.widths[range.clone()].to_vec(),
            effective_bw: self.effective_bw[range.clone()].to_vec(),
            resolution: self.resolution[range].to_vec(),
            ..Default::default()
        };
        info.update();
        info
    }
}
