//! The profiling toolkit that can be disabled in compile-time.

use crate::common::*;

#[cfg(feature = "profiling")]
mod registry {
    use super::*;
    use dashmap::DashSet;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref PROFILING_CONFIG: ProfilingConfig = {
            match envy::prefixed("YOLACT_").from_env() {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        "failed to load profiling environment variables, fallback to default values: {:?}",
                        err
                    );
                    Default::default()
                }
            }
        };
        pub static ref REGISTERED_TIMINGS: DashSet<&'static str> = DashSet::new();
    }
}

/// Profiling options read from `YOLACT_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// Names of timings allowed to report. All timings report if unset.
    pub profiling_whitelist: Option<HashSet<String>>,
}

/// Records the elapsed time between named events.
#[cfg(feature = "profiling")]
#[derive(Debug)]
pub struct Timing {
    name: &'static str,
    instant: Instant,
    elapsed: Vec<(&'static str, Duration)>,
}

#[cfg(not(feature = "profiling"))]
#[derive(Debug)]
pub struct Timing;

impl Timing {
    pub fn new(name: &'static str) -> Self {
        #[cfg(feature = "profiling")]
        {
            if registry::REGISTERED_TIMINGS.insert(name) {
                info!("registered timing profile '{}'", name);
            }

            Self {
                name,
                instant: Instant::now(),
                elapsed: vec![],
            }
        }

        #[cfg(not(feature = "profiling"))]
        {
            let _ = name;
            Self
        }
    }

    pub fn add_event(&mut self, name: &'static str) {
        #[cfg(feature = "profiling")]
        {
            self.elapsed.push((name, self.instant.elapsed()));
            self.instant = Instant::now();
        }

        #[cfg(not(feature = "profiling"))]
        let _ = name;
    }

    pub fn report(&self) {
        #[cfg(feature = "profiling")]
        {
            let can_report = registry::PROFILING_CONFIG
                .profiling_whitelist
                .as_ref()
                .map(|whitelist| whitelist.contains(self.name))
                .unwrap_or(true);

            if can_report {
                info!("profiling report for '{}'", self.name);
                self.elapsed.iter().for_each(|(name, elapsed)| {
                    info!("- {}\t{:?}", name, elapsed);
                });
            }
        }
    }
}
