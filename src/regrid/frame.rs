use hifitime::Epoch;
use marlu::{constants::VEL_C, RADec};
use strum_macros::{Display, EnumIter, EnumString};

/// Spectral reference frames, numbered the way the MEAS_FREQ_REF column
/// numbers them.
#[derive(Debug, Display, EnumIter, EnumString, Clone, Copy, PartialEq, Eq, Default)]
#[strum(ascii_case_insensitive)]
pub enum FreqFrame {
    #[strum(serialize = "REST")]
    Rest,

    #[strum(serialize = "LSRK")]
    Lsrk,

    #[strum(serialize = "LSRD")]
    Lsrd,

    #[strum(serialize = "BARY")]
    Bary,

    #[strum(serialize = "GEO")]
    Geo,

    #[default]
    #[strum(serialize = "TOPO")]
    Topo,

    #[strum(serialize = "GALACTO")]
    Galacto,

    #[strum(serialize = "LGROUP")]
    Lgroup,

    #[strum(serialize = "CMB")]
    Cmb,
}

impl FreqFrame {
    pub fn from_code(code: i32) -> Option<FreqFrame> {
        use FreqFrame::*;
        Some(match code {
            0 => Rest,
            1 => Lsrk,
            2 => Lsrd,
            3 => Bary,
            4 => Geo,
            5 => Topo,
            6 => Galacto,
            7 => Lgroup,
            8 => Cmb,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Converts frequencies between spectral frames. A frequency `f` in `from`
/// is `f * doppler_factor(...)` in `to`.
pub trait FrameConverter: Send + Sync {
    /// `None` if the conversion is not defined for this data.
    fn doppler_factor(
        &self,
        from: FreqFrame,
        to: FreqFrame,
        time: Epoch,
        direction: RADec,
    ) -> Option<f64>;
}

/// Only knows that a frame converts to itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFrames;

impl FrameConverter for IdentityFrames {
    fn doppler_factor(&self, from: FreqFrame, to: FreqFrame, _: Epoch, _: RADec) -> Option<f64> {
        (from == to).then_some(1.0)
    }
}

/// A known radial velocity of frame `to` relative to frame `from`, receding
/// at `velocity` \[m/s\] at `epoch` and changing by `drift` \[m/s/s\].
#[derive(Debug, Clone, Copy)]
pub struct RadialVelocity {
    pub from: FreqFrame,
    pub to: FreqFrame,
    pub velocity: f64,
    pub drift: f64,
    pub epoch: Epoch,
}

impl RadialVelocity {
    fn factor_at(&self, time: Epoch) -> f64 {
        let v = self.velocity + self.drift * (time - self.epoch).to_seconds();
        let beta = v / VEL_C;
        ((1.0 - beta) / (1.0 + beta)).sqrt()
    }
}

impl FrameConverter for RadialVelocity {
    fn doppler_factor(&self, from: FreqFrame, to: FreqFrame, time: Epoch, _: RADec) -> Option<f64> {
        if from == to {
            Some(1.0)
        } else if from == self.from && to == self.to {
            Some(self.factor_at(time))
        } else if from == self.to && to == self.from {
            Some(1.0 / self.factor_at(time))
        } else {
            None
        }
    }
}
