use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FIELD_COUNT: usize = 15;
pub const MAX_BAND_PERIOD: usize = 30;
pub const DEFAULT_RISK_FRACTION: f64 = 0.02;

pub const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "scalper.rsi_period",
    "scalper.oversold",
    "scalper.overbought",
    "scalper.take_profit",
    "scalper.stop_loss",
    "breakout.period",
    "breakout.deviation",
    "breakout.max_width",
    "breakout.take_profit",
    "breakout.stop_loss",
    "pullback.fast_period",
    "pullback.slow_period",
    "pullback.rsi_trigger",
    "pullback.take_profit",
    "pullback.stop_loss",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("{field} must be {requirement}, got {value}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
        value: f64,
    },
    #[error("scalper oversold ({oversold}) must be below overbought ({overbought})")]
    InvertedThresholds { oversold: f64, overbought: f64 },
}

/// Rule A: oscillator cross of the oversold/overbought levels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalperParams {
    pub rsi_period: f64,
    pub oversold: f64,
    pub overbought: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Rule B: close outside the rolling band.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakoutParams {
    pub period: f64,
    pub deviation: f64,
    pub max_width: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Rule C: EMA trend with an oscillator pullback.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullbackParams {
    pub fast_period: f64,
    pub slow_period: f64,
    pub rsi_trigger: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedParameterVector")]
pub struct ParameterVector {
    scalper: ScalperParams,
    breakout: BreakoutParams,
    pullback: PullbackParams,
    risk_fraction: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UncheckedParameterVector {
    scalper: ScalperParams,
    breakout: BreakoutParams,
    pullback: PullbackParams,
    #[serde(default = "default_risk_fraction")]
    risk_fraction: f64,
}

fn default_risk_fraction() -> f64 {
    DEFAULT_RISK_FRACTION
}

impl TryFrom<UncheckedParameterVector> for ParameterVector {
    type Error = ParamError;

    fn try_from(raw: UncheckedParameterVector) -> Result<Self, Self::Error> {
        Self::new(raw.scalper, raw.breakout, raw.pullback, raw.risk_fraction)
    }
}

impl Default for ParameterVector {
    fn default() -> Self {
        Self {
            scalper: ScalperParams {
                rsi_period: 10.0,
                oversold: 30.0,
                overbought: 70.0,
                take_profit: 3.0,
                stop_loss: 2.0,
            },
            breakout: BreakoutParams {
                period: 20.0,
                deviation: 2.0,
                max_width: 500.0,
                take_profit: 5.0,
                stop_loss: 2.0,
            },
            pullback: PullbackParams {
                fast_period: 34.0,
                slow_period: 144.0,
                rsi_trigger: 40.0,
                take_profit: 4.0,
                stop_loss: 2.0,
            },
            risk_fraction: DEFAULT_RISK_FRACTION,
        }
    }
}

impl ParameterVector {
    pub fn new(
        scalper: ScalperParams,
        breakout: BreakoutParams,
        pullback: PullbackParams,
        risk_fraction: f64,
    ) -> Result<Self, ParamError> {
        let v = Self {
            scalper,
            breakout,
            pullback,
            risk_fraction,
        };
        v.validate()?;
        Ok(v)
    }

    /// Builds a vector from the flat 15-field layout
    /// `[scalper x5, breakout x5, pullback x5]`.
    pub fn from_array(fields: [f64; FIELD_COUNT], risk_fraction: f64) -> Result<Self, ParamError> {
        let [s0, s1, s2, s3, s4, b0, b1, b2, b3, b4, p0, p1, p2, p3, p4] = fields;
        Self::new(
            ScalperParams {
                rsi_period: s0,
                oversold: s1,
                overbought: s2,
                take_profit: s3,
                stop_loss: s4,
            },
            BreakoutParams {
                period: b0,
                deviation: b1,
                max_width: b2,
                take_profit: b3,
                stop_loss: b4,
            },
            PullbackParams {
                fast_period: p0,
                slow_period: p1,
                rsi_trigger: p2,
                take_profit: p3,
                stop_loss: p4,
            },
            risk_fraction,
        )
    }

    pub fn to_array(&self) -> [f64; FIELD_COUNT] {
        let s = &self.scalper;
        let b = &self.breakout;
        let p = &self.pullback;
        [
            s.rsi_period,
            s.oversold,
            s.overbought,
            s.take_profit,
            s.stop_loss,
            b.period,
            b.deviation,
            b.max_width,
            b.take_profit,
            b.stop_loss,
            p.fast_period,
            p.slow_period,
            p.rsi_trigger,
            p.take_profit,
            p.stop_loss,
        ]
    }

    pub fn scalper(&self) -> &ScalperParams {
        &self.scalper
    }

    pub fn breakout(&self) -> &BreakoutParams {
        &self.breakout
    }

    pub fn pullback(&self) -> &PullbackParams {
        &self.pullback
    }

    pub fn risk_fraction(&self) -> f64 {
        self.risk_fraction
    }

    pub fn scalper_period(&self) -> usize {
        self.scalper.rsi_period as usize
    }

    pub fn band_period(&self) -> usize {
        self.breakout.period as usize
    }

    pub fn fast_period(&self) -> usize {
        self.pullback.fast_period as usize
    }

    pub fn slow_period(&self) -> usize {
        self.pullback.slow_period as usize
    }

    fn validate(&self) -> Result<(), ParamError> {
        let s = &self.scalper;
        let b = &self.breakout;
        let p = &self.pullback;

        period("scalper.rsi_period", s.rsi_period, 1.0, f64::MAX)?;
        period("breakout.period", b.period, 2.0, MAX_BAND_PERIOD as f64)?;
        period("pullback.fast_period", p.fast_period, 1.0, f64::MAX)?;
        period("pullback.slow_period", p.slow_period, 1.0, f64::MAX)?;

        level("scalper.oversold", s.oversold)?;
        level("scalper.overbought", s.overbought)?;
        level("pullback.rsi_trigger", p.rsi_trigger)?;
        if s.oversold >= s.overbought {
            return Err(ParamError::InvertedThresholds {
                oversold: s.oversold,
                overbought: s.overbought,
            });
        }

        positive("breakout.deviation", b.deviation)?;
        positive("breakout.max_width", b.max_width)?;
        for (field, v) in [
            ("scalper.take_profit", s.take_profit),
            ("scalper.stop_loss", s.stop_loss),
            ("breakout.take_profit", b.take_profit),
            ("breakout.stop_loss", b.stop_loss),
            ("pullback.take_profit", p.take_profit),
            ("pullback.stop_loss", p.stop_loss),
        ] {
            positive(field, v)?;
        }

        if !(self.risk_fraction > 0.0 && self.risk_fraction <= 1.0) {
            return Err(ParamError::Invalid {
                field: "risk_fraction",
                requirement: "in (0, 1]",
                value: self.risk_fraction,
            });
        }
        Ok(())
    }
}

fn period(field: &'static str, v: f64, low: f64, high: f64) -> Result<(), ParamError> {
    if v.is_finite() && v.fract() == 0.0 && v >= low && v <= high {
        Ok(())
    } else {
        Err(ParamError::Invalid {
            field,
            requirement: "a whole number period in range",
            value: v,
        })
    }
}

fn level(field: &'static str, v: f64) -> Result<(), ParamError> {
    if v > 0.0 && v < 100.0 {
        Ok(())
    } else {
        Err(ParamError::Invalid {
            field,
            requirement: "an oscillator level in (0, 100)",
            value: v,
        })
    }
}

fn positive(field: &'static str, v: f64) -> Result<(), ParamError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ParamError::Invalid {
            field,
            requirement: "positive",
            value: v,
        })
    }
}
