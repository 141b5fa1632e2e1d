//! Conversion between mixer register codes and decibels.
//!
//! The mixer stores gain and volume as an integer code in `0..=400`. The code
//! maps onto decibels through three linear segments:
//!
//! | code        | dB                          | resolution |
//! |-------------|-----------------------------|------------|
//! | `0..=80`    | `-60.0 + code * 0.5`        | 0.5 dB     |
//! | `81..=280`  | `-20.0 + (code - 80) * 0.1` | 0.1 dB     |
//! | `281..=400` | `(code - 280) * 0.1`        | 0.1 dB     |

use crate::error::{Result, RoomError};

/// Lowest valid code
pub const MIN_CODE: i32 = 0;

/// Highest valid code
pub const MAX_CODE: i32 = 400;

/// Lowest representable level in dB
pub const MIN_DB: f64 = -60.0;

/// Highest representable level in dB
pub const MAX_DB: f64 = 12.0;

const COARSE_KNEE: i32 = 80;
const UNITY_KNEE: i32 = 280;
const COARSE_KNEE_DB: f64 = -20.0;
const UNITY_KNEE_DB: f64 = 0.0;
const COARSE_STEP: f64 = 0.5;
const FINE_STEP: f64 = 0.1;

/// Convert a mixer code to decibels.
///
/// Fails with [`RoomError::OutOfRange`] when `code` is outside `0..=400`.
pub fn code_to_db(code: i32) -> Result<f64> {
    if !(MIN_CODE..=MAX_CODE).contains(&code) {
        return Err(RoomError::OutOfRange(code));
    }

    let db = if code <= COARSE_KNEE {
        MIN_DB + f64::from(code) * COARSE_STEP
    } else if code <= UNITY_KNEE {
        COARSE_KNEE_DB + f64::from(code - COARSE_KNEE) * FINE_STEP
    } else {
        UNITY_KNEE_DB + f64::from(code - UNITY_KNEE) * FINE_STEP
    };

    Ok(db)
}

/// Convert decibels to the nearest mixer code.
///
/// The input is clamped to `[-60.0, +12.0]` first, so this never fails.
pub fn db_to_code(db: f64) -> u16 {
    let db = clamp_db(db);

    let code = if db <= COARSE_KNEE_DB {
        (db - MIN_DB) / COARSE_STEP
    } else if db <= UNITY_KNEE_DB {
        f64::from(COARSE_KNEE) + (db - COARSE_KNEE_DB) / FINE_STEP
    } else {
        f64::from(UNITY_KNEE) + (db - UNITY_KNEE_DB) / FINE_STEP
    };

    // bounded by the clamp above
    code.round().clamp(f64::from(MIN_CODE), f64::from(MAX_CODE)) as u16
}

/// Clamp a level into the representable range. NaN becomes the minimum.
pub fn clamp_db(db: f64) -> f64 {
    if db.is_nan() {
        return MIN_DB;
    }
    db.clamp(MIN_DB, MAX_DB)
}

/// Clamp a code into the valid range.
pub fn clamp_code(code: i32) -> i32 {
    code.clamp(MIN_CODE, MAX_CODE)
}
