use std::sync::Arc;
use std::time::Duration;

use vitals_core::synthetic::{FingertipConfig, SyntheticFingertip};
use vitals_core::{
    AnthropometricProfile, DeliveryMode, EngineConfig, FrameSource, Gender, MemoryProfileStore, SessionEvent,
    SessionOutcome, StepOutcome, VitalKind, VitalResult, VitalSignsSequence, VitalValue, VitalsEngine, VitalsError,
    run_session,
};

fn engine() -> Arc<VitalsEngine> {
    Arc::new(VitalsEngine::new(EngineConfig::default()))
}

/// A fingertip whose breathing clearly dominates the baseline.
fn breathing_fingertip() -> FingertipConfig {
    FingertipConfig {
        duration_secs: 65.0,
        pulse_amplitude: 0.5,
        breath_amplitude: 4.0,
        ..FingertipConfig::default()
    }
}

fn measure(engine: &Arc<VitalsEngine>, kind: VitalKind, config: FingertipConfig) -> VitalResult {
    measure_as(engine, kind, None, config)
}

fn measure_as(
    engine: &Arc<VitalsEngine>,
    kind: VitalKind,
    profile: Option<AnthropometricProfile>,
    config: FingertipConfig,
) -> VitalResult {
    let source = SyntheticFingertip::new(config);
    match run_session(engine, kind, profile, source, DeliveryMode::Replay, |_| {}).unwrap() {
        SessionOutcome::Completed(result) => result,
        other => panic!("{kind} did not complete: {other:?}"),
    }
}

#[test]
fn heart_rate_converges_before_the_deadline() {
    let engine = engine();
    let mut progress = Vec::new();
    let source = SyntheticFingertip::new(FingertipConfig::default());
    let outcome = run_session(
        &engine,
        VitalKind::HeartRate,
        None,
        source,
        DeliveryMode::Replay,
        |event| {
            if let SessionEvent::Progress(p) = event {
                progress.push(p.percent);
            }
        },
    )
    .unwrap();

    let SessionOutcome::Completed(result) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    let VitalValue::HeartRate { bpm } = result.value else {
        panic!("unexpected value {:?}", result.value);
    };
    assert!((70.0..=74.0).contains(&bpm), "bpm {bpm}");
    assert!(result.elapsed < Duration::from_secs(30));
    assert!(result.quality.snr >= 4.0);

    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(engine.readings().snapshot().unwrap().heart_rate, Some(bpm));
}

#[test]
fn respiration_reads_fifteen_breaths() {
    let engine = engine();
    let result = measure(&engine, VitalKind::Respiration, breathing_fingertip());
    let VitalValue::Respiration { breaths_per_minute } = result.value else {
        panic!("unexpected value {:?}", result.value);
    };
    assert!((14.0..=16.0).contains(&breaths_per_minute), "rpm {breaths_per_minute}");
    assert!(result.elapsed >= Duration::from_secs(20));
}

#[test]
fn spo2_reports_saturation_and_pulse() {
    let engine = engine();
    let result = measure(&engine, VitalKind::Spo2, FingertipConfig::default());
    let VitalValue::Spo2 { percent, pulse_bpm } = result.value else {
        panic!("unexpected value {:?}", result.value);
    };
    assert!((60.0..=100.0).contains(&percent));
    assert!((70.0..=74.0).contains(&pulse_bpm), "pulse {pulse_bpm}");
    assert_eq!(engine.readings().snapshot().unwrap().spo2, Some(percent));
}

#[test]
fn blood_pressure_uses_the_profile() {
    let engine = engine();
    let profile = AnthropometricProfile {
        age: 30.0,
        height_cm: 170.0,
        weight_kg: 70.0,
        gender: Gender::Male,
    };
    let result = measure_as(&engine, VitalKind::BloodPressure, Some(profile), FingertipConfig::default());
    let VitalValue::BloodPressure {
        systolic,
        diastolic,
        heart_rate,
    } = result.value
    else {
        panic!("unexpected value {:?}", result.value);
    };
    assert!((70.0..=74.0).contains(&heart_rate));
    assert!((140.0..=160.0).contains(&systolic), "systolic {systolic}");
    assert!((75.0..=85.0).contains(&diastolic), "diastolic {diastolic}");
    assert!(result.quality.confidence >= 0.45);
}

#[test]
fn glucose_index_stays_in_range() {
    let engine = engine();
    let result = measure(&engine, VitalKind::Glucose, FingertipConfig::default());
    let VitalValue::Glucose { mg_dl, pulse_bpm } = result.value else {
        panic!("unexpected value {:?}", result.value);
    };
    assert!((70.0..=180.0).contains(&mg_dl));
    assert!((70.0..=74.0).contains(&pulse_bpm));
}

#[test]
fn late_finger_placement_starts_timer_on_contact() {
    let engine = engine();
    let result = measure(
        &engine,
        VitalKind::HeartRate,
        FingertipConfig {
            contact_delay_secs: 5.0,
            ..FingertipConfig::default()
        },
    );
    // Timed from the first accepted frame, not from the first frame seen.
    assert!(result.timestamp >= Duration::from_secs(13));
    assert!(result.elapsed < result.timestamp);
}

#[test]
fn cancelled_session_rejects_frames() {
    let engine = engine();
    let handle = engine.start_session(VitalKind::HeartRate, None).unwrap();
    let mut source = SyntheticFingertip::new(FingertipConfig::default());
    for _ in 0..30 {
        let frame = source.next_frame().unwrap().unwrap();
        assert!(engine.process_frame(&handle, &frame.view()).unwrap().is_some());
    }

    assert!(engine.cancel_session(&handle).unwrap());
    let frame = source.next_frame().unwrap().unwrap();
    assert!(matches!(
        engine.process_frame(&handle, &frame.view()),
        Err(VitalsError::UnknownSession(_))
    ));
    assert!(!engine.cancel_session(&handle).unwrap());
}

#[test]
fn full_sequence_records_every_step() {
    let engine = engine();
    let mut store = MemoryProfileStore::new();
    let mut sequence = VitalSignsSequence::new("tester");

    let report = loop {
        let kind = sequence.current().expect("sequence still running");
        let result = measure(&engine, kind, breathing_fingertip());
        match sequence.submit(result, &mut store).unwrap() {
            StepOutcome::Next(_) | StepOutcome::Repeat { .. } => continue,
            StepOutcome::Finished(report) => break report,
        }
    };

    assert!(report.heart_rate.is_some());
    assert!(report.respiration.is_some());
    assert!(report.spo2.is_some());
    assert!(report.systolic.is_some() && report.diastolic.is_some());
    assert_eq!(store.user("tester").unwrap().results.len(), 4);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["user"], "tester");
}
