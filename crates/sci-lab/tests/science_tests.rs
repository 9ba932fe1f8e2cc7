use pretty_assertions::assert_eq;
use sci_core::{Classification, ExperimentBuilder, Operation, ResultPublisher, ResultReport, PublishError};
use sci_lab::{InMemoryPublisher, Laboratory};
use sci_test_utils::{
    ordered_laboratory, recording_laboratory, FailingPublisher, PanickingPublisher, TestError,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mockall::mock! {
    Publisher {}

    impl ResultPublisher for Publisher {
        fn publish(&self, report: &ResultReport) -> Result<(), PublishError>;
    }
}

#[test]
fn test_equal_values_match() {
    let (lab, publisher) = recording_laboratory();
    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Ok(42)).try_candidate("new", || Ok(42));
    });

    assert_eq!(value, Ok(42));
    let report = publisher.latest().unwrap();
    assert_eq!(report.matched, vec!["new".to_string()]);
    assert!(report.mismatched.is_empty());
}

#[test]
fn test_unequal_values_mismatch() {
    let (lab, publisher) = recording_laboratory();
    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Ok(1)).try_candidate("new", || Ok(2));
    });

    assert_eq!(value, Ok(1));
    assert_eq!(publisher.latest().unwrap().mismatched, vec!["new".to_string()]);
}

#[test]
fn test_same_error_matches_and_control_error_propagates() {
    let (lab, publisher) = recording_laboratory();
    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Err(TestError::InvalidOperation("x".into())))
            .try_candidate("new", || Err(TestError::InvalidOperation("x".into())));
    });

    assert_eq!(value, Err(TestError::InvalidOperation("x".into())));
    let report = publisher.latest().unwrap();
    assert_eq!(report.matched, vec!["new".to_string()]);
    assert_eq!(report.control.thrown.unwrap().message, "invalid operation: x");
}

#[test]
fn test_error_identity_needs_kind_and_message() {
    let (lab, publisher) = recording_laboratory();
    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Err(TestError::InvalidOperation("x".into())))
            .try_candidate("other-message", || Err(TestError::InvalidOperation("y".into())))
            .try_candidate("other-kind", || Err(TestError::Argument("x".into())));
    });

    assert!(value.is_err());
    let report = publisher.latest().unwrap();
    assert_eq!(
        report.mismatched,
        vec!["other-message".to_string(), "other-kind".to_string()]
    );

    let control = report.control.thrown.as_ref().unwrap();
    let other_kind = report.candidate("other-kind").unwrap().thrown.as_ref().unwrap();
    assert_eq!(control.type_name, other_kind.type_name);
    assert_eq!(control.variant.as_deref(), Some("InvalidOperation"));
    assert_eq!(other_kind.variant.as_deref(), Some("Argument"));
}

#[test]
fn test_one_sided_error_mismatches() {
    let (lab, publisher) = recording_laboratory();
    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Err(TestError::Argument("bad".into())))
            .try_candidate("new", || Ok(1));
    });

    assert_eq!(value, Err(TestError::Argument("bad".into())));
    assert_eq!(publisher.latest().unwrap().mismatched, vec!["new".to_string()]);
}

#[test]
fn test_candidate_errors_never_reach_caller() {
    let (lab, publisher) = recording_laboratory();
    let value: Result<&str, TestError> = lab.science("greeting", |e| {
        e.use_control(|| Ok("hello"))
            .try_candidate("erroring", || Err(TestError::Argument("nope".into())))
            .try_candidate("panicking", || panic!("candidate exploded"))
            .try_candidate("different", || Ok("hi"));
    });

    assert_eq!(value, Ok("hello"));
    let report = publisher.latest().unwrap();
    assert_eq!(report.mismatched.len(), 3);
    assert_eq!(
        report.candidate("panicking").unwrap().thrown.as_ref().unwrap().message,
        "candidate exploded"
    );
}

#[test]
fn test_control_panic_propagates_after_publishing() {
    let (lab, publisher) = recording_laboratory();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        lab.science::<i32, TestError, _>("answer", |e| {
            e.use_control(|| panic!("control exploded"))
                .try_candidate("new", || Ok(1));
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(publisher.len(), 1);
}

#[test]
fn test_run_if_false_skips_candidates() {
    let calls = AtomicUsize::new(0);
    let (lab, publisher) = recording_laboratory();
    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Ok(1))
            .try_candidate("new", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .run_if(|| false);
    });

    assert_eq!(value, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(publisher.latest().unwrap().candidates.is_empty());
}

#[test]
fn test_ignore_rule_reclassifies_mismatch() {
    let (lab, publisher) = recording_laboratory();
    let _: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Ok(10))
            .try_candidate("close", || Ok(11))
            .ignore(|control: &i32, candidate: &i32| (control - candidate).abs() <= 1);
    });

    let report = publisher.latest().unwrap();
    assert_eq!(report.ignored, vec!["close".to_string()]);
    assert_eq!(
        report.candidate("close").unwrap().classification,
        Some(Classification::Ignored)
    );
}

#[test]
fn test_custom_comparison_replaces_default_chain() {
    let (lab, publisher) = recording_laboratory();
    let _: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Ok(1))
            .try_candidate("new", || Ok(2))
            .compare(|_, _| true);
    });

    assert_eq!(publisher.latest().unwrap().matched, vec!["new".to_string()]);
}

#[test]
fn test_failing_publisher_is_isolated() {
    let publisher = Arc::new(FailingPublisher::new());
    let lab = ordered_laboratory(publisher.clone());
    let failures = AtomicUsize::new(0);

    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Ok(5))
            .try_candidate("new", || Ok(6))
            .on_thrown(|failure| {
                assert_eq!(failure.operation, Operation::Publish);
                failures.fetch_add(1, Ordering::SeqCst);
            });
    });

    assert_eq!(value, Ok(5));
    assert_eq!(publisher.attempts(), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_publisher_is_isolated() {
    let lab = ordered_laboratory(Arc::new(PanickingPublisher));
    let value: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Err(TestError::Argument("x".into())))
            .try_candidate("new", || Ok(6));
    });

    assert_eq!(value, Err(TestError::Argument("x".into())));
}

#[test]
fn test_mock_publisher_receives_one_report() {
    let mut mock = MockPublisher::new();
    mock.expect_publish()
        .times(1)
        .withf(|report| {
            report.experiment_name == "checkout"
                && report.mismatched == vec!["new".to_string()]
                && report.contexts["cart"] == serde_json::json!(17)
        })
        .returning(|_| Ok(()));

    let lab = ordered_laboratory(Arc::new(mock));
    let value: Result<u32, TestError> = lab.science("checkout", |e| {
        e.use_control(|| Ok(100))
            .try_candidate("new", || Ok(99))
            .add_context("cart", 17);
    });

    assert_eq!(value, Ok(100));
}

#[test]
fn test_prebuilt_experiment_without_native_equality() {
    #[derive(Debug)]
    struct Opaque(u8);

    let (lab, publisher) = recording_laboratory();
    let mut builder: ExperimentBuilder<'_, Opaque, TestError> =
        ExperimentBuilder::without_equality("opaque");
    builder
        .use_control(|| Ok(Opaque(1)))
        .try_candidate("new", || Ok(Opaque(1)))
        .compare(|a, b| a.0 == b.0);

    let value = lab.run(builder.build().unwrap()).unwrap();
    assert_eq!(value.0, 1);
    assert_eq!(publisher.latest().unwrap().matched, vec!["new".to_string()]);
}

#[test]
fn test_seeded_laboratories_agree() {
    fn run(seed: u64) -> Vec<&'static str> {
        let order = parking_lot::Mutex::new(Vec::new());
        let lab = sci_test_utils::seeded_laboratory(seed, Arc::new(InMemoryPublisher::new()));
        let _: Result<i32, TestError> = lab.science("order", |e| {
            e.use_control(|| {
                order.lock().push("control");
                Ok(0)
            });
            for name in ["a", "b", "c", "d"] {
                let order = &order;
                e.try_candidate(name, move || {
                    order.lock().push(name);
                    Ok(0)
                });
            }
        });
        order.into_inner()
    }

    assert_eq!(run(11), run(11));
    assert_eq!(run(11).len(), 5);
}

#[test]
fn test_unnamed_candidate_uses_default_name() {
    let (lab, publisher) = recording_laboratory();
    let _: Result<i32, TestError> = lab.science("answer", |e| {
        e.use_control(|| Ok(1)).try_default(|| Ok(1));
    });

    assert_eq!(publisher.latest().unwrap().matched, vec!["candidate".to_string()]);
}

#[test]
fn test_duplicate_candidate_is_a_usage_error() {
    let outcome = Laboratory::new().try_science::<i32, TestError, _>("answer", |e| {
        e.use_control(|| Ok(1))
            .try_candidate("new", || Ok(1))
            .try_candidate("new", || Ok(2));
    });

    assert!(matches!(
        outcome,
        Err(sci_core::UsageError::DuplicateCandidate { ref candidate, .. }) if candidate == "new"
    ));
}
