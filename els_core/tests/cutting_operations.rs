// Integration tests for the cutting workflow driven through the engine

#[cfg(test)]
mod tests {
    use els_core::{
        AtomicPulseCounter, Axis, Config, Engine, ManualClock, OperationError, OperationMode, OperationState,
        PassSubState, RecordingPins,
    };

    type TestEngine = Engine<AtomicPulseCounter, RecordingPins, ManualClock>;

    struct Bench {
        engine: TestEngine,
        spindle: AtomicPulseCounter,
        clock: ManualClock,
    }

    impl Bench {
        fn tick(&mut self, counts: i32) {
            self.spindle.add(counts);
            self.clock.advance(200);
            self.engine.update();
        }
    }

    #[test]
    fn test_turn_requires_touch_off_before_setup() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Turn);
        assert_eq!(bench.engine.next_setup_step(), Err(OperationError::TouchOffIncomplete));
        assert_eq!(
            bench.engine.start_operation(),
            Err(OperationError::NotReady(OperationState::Idle))
        );
        assert_eq!(bench.engine.state(), OperationState::Idle);
    }

    #[test]
    fn test_setup_walks_declared_steps() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Thread);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        assert_eq!(bench.engine.state(), OperationState::TargetDiameter);
        bench.engine.confirm_target_value(180_000).unwrap();
        assert_eq!(bench.engine.state(), OperationState::TargetLength);
        bench.engine.previous_setup_step().unwrap();
        assert_eq!(bench.engine.state(), OperationState::TargetDiameter);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(100_000).unwrap();
        assert_eq!(bench.engine.state(), OperationState::SetupPasses);
        bench.engine.set_passes(4).unwrap();
        assert_eq!(bench.engine.state(), OperationState::SetupStarts);
        bench.engine.set_starts(3).unwrap();
        assert_eq!(bench.engine.state(), OperationState::SetupCone);
        bench.engine.set_cone_ratio(0.0).unwrap();
        assert_eq!(bench.engine.state(), OperationState::Ready);
        assert_eq!(bench.engine.spindle().thread_starts(), 3);
        assert!(matches!(bench.engine.set_passes(2), Err(OperationError::WrongState(OperationState::Ready))));
    }

    #[test]
    fn test_single_pass_external_turn() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Turn);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(180_000).unwrap();
        bench.engine.confirm_target_value(300_000).unwrap();
        bench.engine.set_passes(1).unwrap();
        // 1 mm radial on a 4 mm screw, 30 mm on a 5 mm screw
        assert_eq!(bench.engine.params().cut_depth, 1_000);
        assert_eq!(bench.engine.params().cut_length, 24_000);
        bench.engine.start_operation().unwrap();

        let mut at_retract = None;
        let mut last = bench.engine.sub_state();
        for _ in 0..200_000 {
            bench.tick(12);
            let now = bench.engine.sub_state();
            if last == PassSubState::Cutting && now == PassSubState::Retracting {
                at_retract = Some((bench.engine.target(Axis::X), bench.engine.position(Axis::Z)));
            }
            last = now;
            if !bench.engine.operation().is_running() {
                break;
            }
        }
        let (x_target, z_at_retract) = at_retract.expect("pass never retracted");
        assert_eq!(x_target, -1_000);
        // right to left by default
        assert_eq!(z_at_retract, -24_000);
        assert_eq!(bench.engine.state(), OperationState::Idle);
        assert_eq!(bench.engine.operation().completed_passes(), 1);
        // returned to the touch-off point within the arrival tolerance
        assert!(bench.engine.position(Axis::X).abs() < 5);
        assert!(bench.engine.position(Axis::Z).abs() < 5);
        assert!(!bench.engine.spindle().is_syncing());
    }

    #[test]
    fn test_passes_step_down_to_full_depth() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Turn);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(188_000).unwrap();
        bench.engine.confirm_target_value(20_000).unwrap();
        bench.engine.set_passes(3).unwrap();
        assert_eq!(bench.engine.params().cut_depth, 600);
        bench.engine.start_operation().unwrap();

        let mut depths = Vec::new();
        let mut last = bench.engine.sub_state();
        for _ in 0..200_000 {
            bench.tick(12);
            let now = bench.engine.sub_state();
            if last == PassSubState::Cutting && now == PassSubState::Retracting {
                depths.push(bench.engine.target(Axis::X));
                assert_eq!(bench.engine.params().current_pass as usize, depths.len() - 1);
            }
            last = now;
            if !bench.engine.operation().is_running() {
                break;
            }
        }
        assert_eq!(depths, vec![-200, -400, -600]);
        assert_eq!(bench.engine.params().current_pass, 2);
        assert_eq!(bench.engine.operation().completed_passes(), 3);
        assert_eq!(bench.engine.state(), OperationState::Idle);
    }

    #[test]
    fn test_multi_start_passes_offset_by_half_turn() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Thread);
        bench.engine.set_thread_pitch(1_000, 1).unwrap();
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(196_000).unwrap();
        bench.engine.confirm_target_value(10_000).unwrap();
        bench.engine.set_passes(2).unwrap();
        bench.engine.set_starts(2).unwrap();
        bench.engine.set_cone_ratio(0.0).unwrap();
        bench.engine.start_operation().unwrap();
        assert_eq!(bench.engine.params().start_offset, 600);

        let mut sync_points = Vec::new();
        let mut last = bench.engine.sub_state();
        for _ in 0..200_000 {
            bench.tick(6);
            let now = bench.engine.sub_state();
            if last == PassSubState::SyncSpindle && now == PassSubState::Cutting {
                sync_points.push(bench.engine.params().spindle_sync_pos);
            }
            last = now;
            if !bench.engine.operation().is_running() {
                break;
            }
        }
        assert_eq!(sync_points.len(), 2);
        assert_eq!((sync_points[1] - sync_points[0]).rem_euclid(1200), 600);
    }

    #[test]
    fn test_emergency_stop_unwinds_running_operation() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Turn);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(180_000).unwrap();
        bench.engine.confirm_target_value(300_000).unwrap();
        bench.engine.set_passes(1).unwrap();
        bench.engine.start_operation().unwrap();
        for _ in 0..2_000 {
            bench.tick(12);
        }
        assert_eq!(bench.engine.sub_state(), PassSubState::Cutting);

        bench.engine.emergency_stop_handle().trigger();
        bench.tick(12);
        assert_eq!(bench.engine.state(), OperationState::Idle);
        assert!(!bench.engine.params().has_touch_off());
        assert!(!bench.engine.spindle().is_syncing());
        let held = (bench.engine.position(Axis::X), bench.engine.position(Axis::Z));
        assert_eq!(bench.engine.target(Axis::X), held.0);
        assert_eq!(bench.engine.target(Axis::Z), held.1);
        for _ in 0..500 {
            bench.tick(12);
        }
        assert_eq!((bench.engine.position(Axis::X), bench.engine.position(Axis::Z)), held);
        assert_eq!(bench.engine.start_operation(), Err(OperationError::EmergencyStop));
        assert_eq!(bench.engine.move_relative(Axis::Z, 10), Err(OperationError::EmergencyStop));

        bench.engine.set_emergency_stop(false);
        assert!(matches!(bench.engine.start_operation(), Err(OperationError::NotReady(_))));
    }

    #[test]
    fn test_manual_jog_rejected_while_running() {
        let mut bench = create_test_bench();
        bench.engine.start_operation().unwrap();
        assert_eq!(bench.engine.mode(), OperationMode::Normal);
        assert_eq!(bench.engine.move_relative(Axis::X, 10), Err(OperationError::Busy));
        bench.engine.stop_operation();
        assert_eq!(bench.engine.move_relative(Axis::X, 10), Ok(10));
    }

    #[test]
    fn test_face_sweeps_x_at_face_depth() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Face);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(100_000).unwrap();
        bench.engine.confirm_target_value(5_000).unwrap();
        bench.engine.set_passes(1).unwrap();
        assert_eq!(bench.engine.params().cut_length, 5_000);
        assert_eq!(bench.engine.params().cut_depth, 400);
        bench.engine.start_operation().unwrap();

        let mut at_retract = None;
        let mut last = bench.engine.sub_state();
        for _ in 0..200_000 {
            bench.tick(12);
            let now = bench.engine.sub_state();
            if last == PassSubState::Cutting && now == PassSubState::Retracting {
                at_retract = Some((bench.engine.position(Axis::X), bench.engine.position(Axis::Z)));
            }
            last = now;
            if !bench.engine.operation().is_running() {
                break;
            }
        }
        let (x, z) = at_retract.expect("face pass never retracted");
        assert!((x + 5_000).abs() < 5);
        assert!((z + 400).abs() < 5);
        assert_eq!(bench.engine.operation().completed_passes(), 1);
    }

    #[test]
    fn test_face_holds_x_until_z_reaches_depth() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Face);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(100_000).unwrap();
        bench.engine.confirm_target_value(20_000).unwrap();
        bench.engine.set_passes(1).unwrap();
        bench.engine.start_operation().unwrap();

        let mut plunge_ticks = 0;
        for _ in 0..200_000 {
            bench.tick(12);
            if bench.engine.sub_state() != PassSubState::Cutting {
                if plunge_ticks > 0 {
                    break;
                }
                continue;
            }
            if (bench.engine.position(Axis::Z) + 1_600).abs() >= 5 {
                plunge_ticks += 1;
                assert_eq!(bench.engine.target(Axis::X), 0);
                assert_eq!(bench.engine.position(Axis::X), 0);
            }
        }
        assert!(plunge_ticks > 1);
    }

    #[test]
    fn test_cut_plunges_x_only() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Cut);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(180_000).unwrap();
        bench.engine.set_passes(1).unwrap();
        assert_eq!(bench.engine.state(), OperationState::Ready);
        bench.engine.start_operation().unwrap();

        let mut deepest = 0;
        for _ in 0..200_000 {
            bench.tick(12);
            deepest = deepest.min(bench.engine.target(Axis::X));
            assert_eq!(bench.engine.target(Axis::Z), 0);
            if !bench.engine.operation().is_running() {
                break;
            }
        }
        assert_eq!(deepest, -1_000);
        assert_eq!(bench.engine.state(), OperationState::Idle);
        assert_eq!(bench.engine.operation().completed_passes(), 1);
    }

    #[test]
    fn test_cone_couples_x_to_z() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Cone);
        bench.engine.set_thread_pitch(1_000, 1).unwrap();
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        assert_eq!(bench.engine.state(), OperationState::SetupCone);
        bench.engine.set_cone_ratio(0.5).unwrap();
        bench.engine.start_operation().unwrap();
        // one revolution
        for _ in 0..100 {
            bench.tick(12);
        }
        assert_eq!(bench.engine.target(Axis::Z), -80);
        assert_eq!(bench.engine.target(Axis::X), -50);
        // reverse rotation is followed back
        for _ in 0..50 {
            bench.tick(-12);
        }
        assert!(bench.engine.target(Axis::Z) > -80);
        assert!(bench.engine.operation().is_running());
    }

    #[test]
    fn test_emergency_stop_during_parameter_entry() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Turn);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.move_relative(Axis::Z, 2_000).unwrap();
        for _ in 0..20 {
            bench.tick(0);
        }
        bench.engine.next_setup_step().unwrap();
        assert_eq!(bench.engine.state(), OperationState::TargetDiameter);
        bench.engine.set_emergency_stop(true);
        assert_halted(&bench.engine);
        assert!(bench.engine.position(Axis::Z) < 2_000);
    }

    #[test]
    fn test_emergency_stop_when_ready() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Turn);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(180_000).unwrap();
        bench.engine.confirm_target_value(300_000).unwrap();
        bench.engine.set_passes(1).unwrap();
        assert_eq!(bench.engine.state(), OperationState::Ready);
        bench.engine.set_emergency_stop(true);
        assert_halted(&bench.engine);
        assert_eq!(bench.engine.start_operation(), Err(OperationError::EmergencyStop));
    }

    #[test]
    fn test_emergency_stop_while_retracting() {
        let mut bench = create_test_bench();
        bench.engine.set_mode(OperationMode::Turn);
        touch_off(&mut bench.engine, 20.0);
        bench.engine.next_setup_step().unwrap();
        bench.engine.confirm_target_value(180_000).unwrap();
        bench.engine.confirm_target_value(20_000).unwrap();
        bench.engine.set_passes(1).unwrap();
        bench.engine.start_operation().unwrap();
        for _ in 0..200_000 {
            bench.tick(12);
            if bench.engine.sub_state() == PassSubState::Retracting {
                break;
            }
        }
        assert_eq!(bench.engine.sub_state(), PassSubState::Retracting);
        bench.tick(12);
        bench.engine.set_emergency_stop(true);
        assert_halted(&bench.engine);
        let halted_at = (bench.engine.position(Axis::X), bench.engine.position(Axis::Z));
        for _ in 0..100 {
            bench.tick(12);
        }
        assert_eq!((bench.engine.position(Axis::X), bench.engine.position(Axis::Z)), halted_at);
        assert!(!bench.engine.params().has_touch_off());
    }

    fn assert_halted(engine: &TestEngine) {
        assert_eq!(engine.state(), OperationState::Idle);
        assert!(!engine.operation().is_running());
        for axis in [Axis::X, Axis::Z] {
            assert_eq!(engine.target(axis), engine.position(axis));
        }
        assert!(!engine.spindle().is_syncing());
    }

    fn touch_off(engine: &mut TestEngine, diameter_mm: f32) {
        engine.start_touch_off_x().unwrap();
        engine.confirm_touch_off_value(diameter_mm).unwrap();
        engine.start_touch_off_z().unwrap();
        engine.confirm_touch_off_value(0.0).unwrap();
        assert!(engine.params().has_touch_off());
    }

    fn create_test_bench() -> Bench {
        let spindle = AtomicPulseCounter::new();
        let clock = ManualClock::new();
        let engine = Engine::new(
            Config::default(),
            spindle.clone(),
            RecordingPins::new(),
            RecordingPins::new(),
            clock.clone(),
        );
        Bench { engine, spindle, clock }
    }
}
