use crate::util::constants::*;
use std::default::Default;
use std::fmt;
use std::str::FromStr;

/// The gap between the activation thresholds of two successive refinement workers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThresholdStep {
    /// Derive the step from the zones: `max((yellow - green) / (threads + 1), 1)`.
    Auto,
    /// A fixed, positive step.
    Fixed(usize),
}

impl FromStr for ThresholdStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ThresholdStep::Auto);
        }
        match s.parse::<usize>() {
            // With a zero step the activation and deactivation ranges of neighbouring
            // workers overlap, so it is rejected outright.
            Ok(0) => Err("threshold step must be positive".into()),
            Ok(v) => Ok(ThresholdStep::Fixed(v)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Errors detected while configuring the refinement subsystem. All of them are fatal: the
/// subsystem refuses to start rather than guess.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option {0}")]
    UnknownOption(String),
    #[error("invalid value {value:?} for option {name}")]
    InvalidValue { name: String, value: String },
    #[error("zones must satisfy green ({green}) <= yellow ({yellow}) <= red ({red})")]
    ZonesOutOfOrder {
        green: usize,
        yellow: usize,
        red: usize,
    },
    #[error("the derived or configured threshold step is zero")]
    ZeroThresholdStep,
    #[error("heap range {start}..{end} is not aligned to the region size {region_size:#x}")]
    UnalignedHeap {
        start: crate::util::Address,
        end: crate::util::Address,
        region_size: usize,
    },
}

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($name:ident ($flag:literal): $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name ($flag): $type[$validator] = $default),*);
    ];
    ($($name:ident ($flag:literal): $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option by its snake-case name or by its JVM flag name.
            /// Returns false (and keeps the current value) if the key is unknown, or the value
            /// cannot be parsed or fails validation.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_from_str()) to the right type
                    $(stringify!($name) | $flag => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Current value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Current value will be used.", s, val);
                        false
                    },)*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Is `s` the snake-case name or the JVM flag name of an option?
            pub fn is_option(s: &str) -> bool {
                matches!(s, $(stringify!($name) | $flag)|*)
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options {
                    $($name: $default),*
                };

                // If we have env vars that start with G1REFINE_ and match any option (such as
                // G1REFINE_G1_CONC_REFINEMENT_THREADS), we set the option to its value (if it is
                // a valid value). Otherwise, use the default value.
                const PREFIX: &str = "G1REFINE_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Number of concurrent refinement workers, 0 for one per CPU. One more thread is started for
    // young RSet sampling.
    g1_conc_refinement_threads ("G1ConcRefinementThreads"): usize [always_valid] = num_cpus::get(),
    // Completed-buffer backlog below which no worker runs.
    g1_conc_refinement_green_zone ("G1ConcRefinementGreenZone"): usize [always_valid] = num_cpus::get(),
    // Backlog up to which concurrent refinement is expected to keep up.
    g1_conc_refinement_yellow_zone ("G1ConcRefinementYellowZone"): usize [always_valid] = num_cpus::get() * 3,
    // Backlog from which mutators refine their own buffers.
    g1_conc_refinement_red_zone ("G1ConcRefinementRedZone"): usize [always_valid] = num_cpus::get() * 6,
    // Gap between the activation thresholds of successive workers.
    g1_conc_refinement_threshold_step ("G1ConcRefinementThresholdStep"): ThresholdStep [always_valid] = ThresholdStep::Auto,
    // Period of the young RSet length sampler.
    g1_conc_refinement_service_interval_millis ("G1ConcRefinementServiceIntervalMillis"): u64 [|v: &u64| *v > 0] = 300,
    // log2 of the number of hot card cache entries. 0 disables the cache.
    g1_conc_rs_log_cache_size ("G1ConcRSLogCacheSize"): usize [|v: &usize| *v <= MAX_LOG_HOT_CARD_CACHE_SIZE] = 10,
    // Number of refinements after which a card is considered hot.
    g1_conc_rs_hot_card_limit ("G1ConcRSHotCardLimit"): u8 [always_valid] = 4,
    // Let pause statistics adjust the zones.
    g1_use_adaptive_conc_refinement ("G1UseAdaptiveConcRefinement"): bool [always_valid] = true,
    // Log worker activation and deactivation.
    g1_trace_conc_refinement ("G1TraceConcRefinement"): bool [always_valid] = false,
    // Number of card slots in a dirty card buffer.
    g1_update_buffer_size ("G1UpdateBufferSize"): usize [|v: &usize| *v > 0] = 256,
    // Size of a heap region in bytes.
    g1_heap_region_size ("G1HeapRegionSize"): usize [|v: &usize| v.is_power_of_two() && *v >= MIN_BYTES_IN_REGION] = DEFAULT_BYTES_IN_REGION,
    // Number of hot card cache entries a pause worker claims at a time.
    claim_chunk_size ("ClaimChunkSize"): usize [|v: &usize| *v > 0] = 32,
    // Drop cards that are no longer dirty from a full buffer before handing it off.
    g1_filter_dirty_card_buffers ("G1FilterDirtyCardBuffers"): bool [always_valid] = false,
    // A filtered buffer is handed off only if at least this percentage of it survived filtering.
    g1_dirty_card_buffer_enqueue_threshold_percent ("G1DirtyCardBufferEnqueueThresholdPercent"): usize [|v: &usize| *v <= 100] = 60,
}

impl Options {
    /// Process one JVM-style flag: `+Name`, `-Name` for booleans, or `Name=value`.
    pub fn process_jvm_flag(&mut self, flag: &str) -> bool {
        let flag = flag.strip_prefix("-XX:").unwrap_or(flag);
        trace!("Trying to process flag: {}", flag);
        let result = if let Some((name, value)) = flag.split_once('=') {
            self.set_from_str(name.trim(), value.trim())
        } else if let Some(name) = flag.strip_prefix('+') {
            self.set_from_str(name, "true")
        } else if let Some(name) = flag.strip_prefix('-') {
            self.set_from_str(name, "false")
        } else {
            warn!("Malformed flag {}", flag);
            false
        };
        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed");
        }
        result
    }

    /// Process a whitespace-separated list of JVM-style flags. Stops at the first flag that
    /// cannot be applied.
    pub fn process_bulk(&mut self, flags: &str) -> Result<(), ConfigError> {
        for flag in flags.split_ascii_whitespace() {
            if !self.process_jvm_flag(flag) {
                let stripped = flag.strip_prefix("-XX:").unwrap_or(flag);
                let name = stripped
                    .split_once('=')
                    .map(|(n, _)| n)
                    .unwrap_or_else(|| stripped.trim_start_matches(['+', '-']));
                return Err(if Options::is_option(name) {
                    ConfigError::InvalidValue {
                        name: name.to_string(),
                        value: flag.to_string(),
                    }
                } else {
                    ConfigError::UnknownOption(name.to_string())
                });
            }
        }
        Ok(())
    }

    /// Number of hot card cache entries, or zero if the cache is disabled.
    pub fn hot_card_cache_size(&self) -> usize {
        if self.g1_conc_rs_log_cache_size == 0 {
            0
        } else {
            1 << self.g1_conc_rs_log_cache_size
        }
    }
}

impl fmt::Display for ThresholdStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ThresholdStep::Auto => write!(f, "auto"),
            ThresholdStep::Fixed(v) => write!(f, "{}", v),
        }
    }
}
