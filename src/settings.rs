use std::fmt::Display;
use std::str::FromStr;

use tracing::warn;

use crate::state::StateView;
use crate::timer::TimerSettings;

pub const MINIMUM_WAIT_TIME_KEY: &str = "poet.wait_timer.minimum_wait_time";
pub const TARGET_WAIT_TIME_KEY: &str = "poet.wait_timer.target_wait_time";
pub const INITIAL_WAIT_TIME_KEY: &str = "poet.wait_timer.initial_wait_time";
pub const SAMPLE_LENGTH_KEY: &str = "poet.wait_timer.certificate_sample_length";
pub const FIXED_DURATION_BLOCKS_KEY: &str = "poet.wait_timer.fixed_duration_blocks";

/// On-chain consensus settings, with locally configured fallbacks.
pub struct SettingsView<'a> {
    state: &'a StateView
}

impl<'a> SettingsView<'a> {
    pub fn new(state: &'a StateView) -> Self {
        Self { state }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.state.get(key).and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    // Missing or invalid values fall back to `default`, the latter with a warning.
    fn get_setting<T>(&self, key: &str, default: T, valid: impl Fn(&T) -> bool) -> T
    where
        T: FromStr + Display + Copy,
    {
        let raw = match self.state.get(key) {
            Some(raw) => raw,
            None => return default
        };
        match std::str::from_utf8(raw).ok().and_then(|s| s.trim().parse::<T>().ok()) {
            Some(value) if valid(&value) => value,
            _ => {
                warn!(
                    key,
                    value = %String::from_utf8_lossy(raw),
                    %default,
                    "Invalid consensus setting, using default"
                );
                default
            }
        }
    }

    pub fn timer_settings(&self, defaults: &TimerSettings) -> TimerSettings {
        let positive = |v: &f64| v.is_finite() && *v > 0.0;
        TimerSettings {
            minimum_wait_time: self.get_setting(MINIMUM_WAIT_TIME_KEY, defaults.minimum_wait_time, positive),
            target_wait_time: self.get_setting(TARGET_WAIT_TIME_KEY, defaults.target_wait_time, positive),
            initial_wait_time: self.get_setting(INITIAL_WAIT_TIME_KEY, defaults.initial_wait_time, positive),
            certificate_sample_length: self.get_setting(SAMPLE_LENGTH_KEY, defaults.certificate_sample_length, |v| *v > 0),
            fixed_duration_blocks: self.get_setting(FIXED_DURATION_BLOCKS_KEY, defaults.fixed_duration_blocks, |v| *v > 0),
        }
    }
}
