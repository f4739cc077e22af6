//! Hub firmware log levels.
//!
//! `LogLogEnable` holds two bits per firmware log tag, tag `i` at bits
//! `2i..2i+2`. Updates come in as `TAG=LEVEL` pairs, e.g.
//! `LOG_ACCEL=LOG_DEBUG,LOG_POWER=LOG_ERROR`.

use log::debug;

/// Level names, indexed by their 2-bit value.
pub const LOG_LEVELS: [&str; 4] = ["LOG_ERROR", "LOG_WARNING", "LOG_INFO", "LOG_DEBUG"];

/// Tag names, indexed by their slot in the enable word.
pub const LOG_TAGS: [&str; 16] = [
    "LOG_GENERAL",
    "LOG_POWER",
    "LOG_ACCEL",
    "LOG_GYRO",
    "LOG_COMPASS",
    "LOG_FUSION",
    "LOG_PEDOMETER",
    "LOG_METS",
    "LOG_LIGHT",
    "LOG_RTC",
    "LOG_GESTURE",
    "LOG_DISPLAY",
    "LOG_USERSETTINGS",
    "LOG_BUS",
    "LOG_PANIC",
    "LOG_TCMD",
];

const DELIMITERS: &[char] = &['=', ',', '\n', ' '];

/// Apply `TAG=LEVEL` pairs to `current`. Pairs naming an unknown tag or
/// level are skipped, a trailing tag without a level is ignored.
pub fn apply_log_levels(mut current: u64, pairs: &str) -> u64 {
    let mut tokens = pairs.split(DELIMITERS).filter(|t| !t.is_empty());
    while let (Some(tag), Some(level)) = (tokens.next(), tokens.next()) {
        let Some(tag_idx) = LOG_TAGS.iter().position(|t| *t == tag) else {
            debug!("unknown hub log tag {tag}");
            continue;
        };
        let Some(level_idx) = LOG_LEVELS.iter().position(|l| *l == level) else {
            debug!("unknown hub log level {level}");
            continue;
        };
        let shift = tag_idx * 2;
        current &= !(0b11 << shift);
        current |= (level_idx as u64) << shift;
    }
    current
}

/// Level currently set for `tag` in `levels`.
pub fn level_of(levels: u64, tag: &str) -> Option<&'static str> {
    let idx = LOG_TAGS.iter().position(|t| *t == tag)?;
    Some(LOG_LEVELS[((levels >> (idx * 2)) & 0b11) as usize])
}
