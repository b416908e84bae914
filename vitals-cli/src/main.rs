//! # Vitals - Headless Measurement Driver
//!
//! Replays a synthetic fingertip video through the vitals core and prints the
//! results as JSON. It stands in for the camera and the screens of a real
//! application and exercises the same public API they would use.
//!
//! ## Architecture
//! - **Main Thread**: argument parsing (clap), sequencing, JSON output
//! - **Pump Thread**: renders frames and hands them over one at a time
//! - **Worker Thread**: feeds frames into the engine, forwards session events
//! - **Communication**: Crossbeam channels between the three

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use serde::Serialize;
use vitals_core::synthetic::{FingertipConfig, SyntheticFingertip};
use vitals_core::{
    AnthropometricProfile, DeliveryMode, EngineConfig, MealTiming, MemoryProfileStore, ProfileStore, SessionEvent,
    SessionOutcome, StepOutcome, VitalKind, VitalSignsSequence, VitalsEngine, run_session,
};

/// Attempts per vital before giving up.
const MAX_ATTEMPTS: usize = 3;

/// What to measure: one vital, or the full check-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Single(VitalKind),
    Sequence,
}

fn parse_target(value: &str) -> Result<Target, String> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(Target::Sequence);
    }
    value.parse().map(Target::Single).map_err(|e| format!("{e}"))
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum MealArg {
    Fasting,
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl From<MealArg> for MealTiming {
    fn from(meal: MealArg) -> Self {
        match meal {
            MealArg::Fasting => MealTiming::Fasting,
            MealArg::Breakfast => MealTiming::Breakfast,
            MealArg::Lunch => MealTiming::Lunch,
            MealArg::Dinner => MealTiming::Dinner,
            MealArg::Snack => MealTiming::Snack,
        }
    }
}

/// Replays a synthetic fingertip recording through the vitals engine
#[derive(Parser, Debug)]
#[command(name = "vitals")]
#[command(version, about = "Camera PPG vital-sign measurement driver")]
struct Cli {
    /// Vital to measure (hr, rr, spo2, bp, glucose) or `all` for the check-up sequence
    #[arg(value_parser = parse_target)]
    target: Target,

    /// Engine configuration (JSON, partial allowed)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Anthropometric profile (JSON)
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Profile store to read the user from and record into
    #[arg(long)]
    store: Option<PathBuf>,

    /// User key in the profile store
    #[arg(long, default_value = "guest")]
    user: String,

    /// When the user last ate
    #[arg(long, value_enum, ignore_case = true)]
    meal: Option<MealArg>,

    /// Simulated heart rate
    #[arg(long)]
    bpm: Option<f64>,

    /// Simulated breathing rate
    #[arg(long)]
    rpm: Option<f64>,

    /// Simulated frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Length of the simulated recording in seconds
    #[arg(long)]
    seconds: Option<f64>,

    /// Luma noise half-width
    #[arg(long)]
    noise: Option<f64>,

    /// Noise seed
    #[arg(long)]
    seed: Option<u64>,

    /// Pace frames in real time and drop them while busy
    #[arg(long)]
    realtime: bool,

    /// Print progress events as well
    #[arg(long)]
    progress: bool,
}

impl Cli {
    /// The synthetic recording, with command-line overrides applied.
    fn fingertip(&self) -> FingertipConfig {
        let mut fingertip = FingertipConfig::default();
        if let Some(bpm) = self.bpm {
            fingertip.heart_rate_bpm = bpm;
        }
        if let Some(rpm) = self.rpm {
            fingertip.breathing_rpm = rpm;
        }
        if let Some(fps) = self.fps {
            fingertip.fps = fps;
        }
        if let Some(seconds) = self.seconds {
            fingertip.duration_secs = seconds;
        }
        if let Some(noise) = self.noise {
            fingertip.noise = noise;
        }
        if let Some(seed) = self.seed {
            fingertip.seed = seed;
        }
        fingertip
    }
}

/// One line of output.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Output<'a> {
    Event { event: &'a SessionEvent },
    Outcome { vital: VitalKind, attempt: usize, outcome: &'a SessionOutcome },
    Report { report: &'a vitals_core::VitalSignsReport },
}

fn emit(output: &Output<'_>) -> Result<()> {
    println!("{}", serde_json::to_string(output)?);
    Ok(())
}

struct Driver {
    engine: Arc<VitalsEngine>,
    cli: Cli,
    fingertip: FingertipConfig,
    profile: Option<AnthropometricProfile>,
}

impl Driver {
    /// Measures `kind` until it completes or the attempts run out.
    fn measure(&self, kind: VitalKind) -> Result<Option<vitals_core::VitalResult>> {
        let mode = if self.cli.realtime {
            DeliveryMode::Live
        } else {
            DeliveryMode::Replay
        };

        for attempt in 1..=MAX_ATTEMPTS {
            let mut fingertip = self.fingertip.clone();
            fingertip.seed = fingertip.seed.wrapping_add(attempt as u64 - 1);
            let source = SyntheticFingertip::new(fingertip);
            info!("[MAIN] {kind} attempt {attempt}: {} frames", source.total_frames());

            let mut emit_error = None;
            let outcome = run_session(&self.engine, kind, self.profile, source, mode, |event| {
                let interesting = self.cli.progress || !matches!(event, SessionEvent::Progress(_));
                if interesting && emit_error.is_none() {
                    emit_error = emit(&Output::Event { event }).err();
                }
            })?;
            if let Some(e) = emit_error {
                return Err(e);
            }
            emit(&Output::Outcome {
                vital: kind,
                attempt,
                outcome: &outcome,
            })?;

            match outcome {
                SessionOutcome::Completed(result) => return Ok(Some(result)),
                SessionOutcome::Failed(failure) => {
                    warn!("[MAIN] {kind} attempt {attempt} failed: {:?}", failure.last_rejection)
                }
                SessionOutcome::SourceExhausted => {
                    warn!("[MAIN] {kind} attempt {attempt}: recording ended before a result")
                }
            }
        }
        Ok(None)
    }

    fn run_sequence(&self, store: &mut MemoryProfileStore) -> Result<()> {
        let mut sequence = VitalSignsSequence::new(self.cli.user.clone());
        let mut repeats = 0;
        while let Some(kind) = sequence.current() {
            let result = self
                .measure(kind)?
                .ok_or_else(|| anyhow!("{kind} could not be measured"))?;
            match sequence.submit(result, store)? {
                StepOutcome::Next(next) => {
                    repeats = 0;
                    info!("[MAIN] next: {next}");
                }
                StepOutcome::Repeat { kind, rejection } => {
                    repeats += 1;
                    if repeats >= MAX_ATTEMPTS {
                        bail!("{kind} kept producing unreportable values ({rejection})");
                    }
                }
                StepOutcome::Finished(report) => emit(&Output::Report { report: &report })?,
            }
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("[MAIN] Starting vitals driver: {:?}", cli.target);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(meal) = cli.meal {
        config.glucose.meal = meal.into();
    }

    let mut store = match &cli.store {
        Some(path) if path.exists() => MemoryProfileStore::load(path)?,
        _ => MemoryProfileStore::new(),
    };
    let profile = match &cli.profile {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            let profile: AnthropometricProfile =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            store.insert_profile(&cli.user, profile);
            Some(profile)
        }
        None => store.profile(&cli.user),
    };

    let driver = Driver {
        engine: Arc::new(VitalsEngine::new(config)),
        fingertip: cli.fingertip(),
        cli,
        profile,
    };

    match driver.cli.target {
        Target::Single(kind) => {
            if let Some(result) = driver.measure(kind)? {
                store.record(&driver.cli.user, &result);
            }
        }
        Target::Sequence => driver.run_sequence(&mut store)?,
    }

    if let Some(path) = &driver.cli.store {
        store.save(path)?;
        info!("[MAIN] profile store saved to {}", path.display());
    }
    info!("[MAIN] {} frames dropped by the engine", driver.engine.dropped_frames());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_vital_with_overrides() {
        let cli = Cli::try_parse_from(["vitals", "--bpm", "88", "--meal", "Lunch", "spo2", "--realtime"]).unwrap();
        assert_eq!(cli.target, Target::Single(VitalKind::Spo2));
        assert_eq!(cli.meal.map(MealTiming::from), Some(MealTiming::Lunch));
        assert!(cli.realtime);
        assert_eq!(cli.user, "guest");

        let fingertip = cli.fingertip();
        assert_eq!(fingertip.heart_rate_bpm, 88.0);
        assert_eq!(fingertip.fps, FingertipConfig::default().fps);
    }

    #[test]
    fn parses_sequence() {
        let cli = Cli::try_parse_from(["vitals", "all", "--user", "ana"]).unwrap();
        assert_eq!(cli.target, Target::Sequence);
        assert_eq!(cli.user, "ana");
        assert_eq!(cli.fingertip(), FingertipConfig::default());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Cli::try_parse_from(["vitals"]).is_err());
        assert!(Cli::try_parse_from(["vitals", "ecg"]).is_err());
        assert!(Cli::try_parse_from(["vitals", "hr", "--fps"]).is_err());
        assert!(Cli::try_parse_from(["vitals", "hr", "--fps", "fast"]).is_err());
        assert!(Cli::try_parse_from(["vitals", "hr", "--meal", "brunch"]).is_err());
        assert!(Cli::try_parse_from(["vitals", "hr", "--verbose"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
