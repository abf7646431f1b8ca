//! Timer register arithmetic for the acquisition wait timer
//!
//! The MCU paces emit/listen cycles with a TCC hardware timer clocked at
//! 120 MHz. A desired wait period maps to a `(TOP, prescaler)` pair with
//! `TOP * divisor / clock ≈ period`.

/// Undivided timer input clock, Hz
pub const TCC_GCLK_FREQ: f64 = 120_000_000.0;
/// Largest counter roll-over value (16-bit counter)
pub const TCC_MAX_TOP: u32 = 65_535;
/// Smallest usable roll-over value
pub const TCC_MIN_TOP: u32 = 50;

/// Prescaler divisors in increasing order, paired with their register values
pub const PRESCALER_DIVISORS: [u32; 8] = [1, 2, 4, 8, 16, 64, 256, 1024];
/// Register encodings for `PRESCALER_DIVISORS`, index-aligned
pub const PRESCALER_REG_VALS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

/// Longest representable period: 1024 * 65535 / 120MHz
pub const T_WAIT_MAX: f64 = 0.559;
/// Shortest representable period: 50 / 120MHz
pub const T_WAIT_MIN: f64 = 0.4167e-6;

/// A resolved wait-timer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerSetting {
    /// The period actually produced (clamped to the representable range)
    pub period: f64,
    /// Counter roll-over value
    pub top: u32,
    /// Prescaler register encoding
    pub prescaler_reg: u8,
    /// Prescaler divisor corresponding to `prescaler_reg`
    pub divisor: u32,
}

/// Map a desired wait period to timer register values
///
/// Out-of-range periods clamp to the min/max tuples. In range, divisors
/// are scanned in increasing order and the first whose `TOP` fits the
/// 16-bit counter wins, which keeps timer resolution as fine as possible.
pub fn determine_timer_vals(period: f64) -> TimerSetting {
    if period >= T_WAIT_MAX {
        return TimerSetting {
            period: T_WAIT_MAX,
            top: TCC_MAX_TOP,
            prescaler_reg: PRESCALER_REG_VALS[7],
            divisor: 1024,
        };
    }

    if period <= T_WAIT_MIN {
        return TimerSetting {
            period: T_WAIT_MIN,
            top: TCC_MIN_TOP,
            prescaler_reg: PRESCALER_REG_VALS[0],
            divisor: 1,
        };
    }

    // clock * period is constant across the scan
    let ratio = TCC_GCLK_FREQ * period;

    for (i, &div) in PRESCALER_DIVISORS.iter().enumerate() {
        let top = (ratio / div as f64) - 1.0;
        if top <= TCC_MAX_TOP as f64 {
            return TimerSetting {
                period,
                top: top as u32,
                prescaler_reg: PRESCALER_REG_VALS[i],
                divisor: div,
            };
        }
    }

    // Unreachable: DIV1024 covers everything below T_WAIT_MAX
    TimerSetting {
        period: T_WAIT_MAX,
        top: TCC_MAX_TOP,
        prescaler_reg: PRESCALER_REG_VALS[7],
        divisor: 1024,
    }
}
