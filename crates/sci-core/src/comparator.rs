//! Result comparison
//!
//! Provides the [`EqualityStrategy`] trait and the [`ResultComparator`] that
//! evaluates an ordered chain of strategies. The first strategy that reaches
//! a verdict wins; strategies that do not apply defer to the next one, and a
//! pair nobody vouches for is unequal.
//!
//! The chain is assembled once, when the experiment is built:
//!
//! 1. [`CustomComparison`] or [`CustomComparer`] (the function wins if both are set)
//! 2. [`ThrownEquality`]
//! 3. [`AbsentEquality`]
//! 4. [`NativeEquality`]
//! 5. [`OrderingEquality`]

use crate::error::ComparisonError;
use crate::observation::{panic_message, Observation, Outcome};
use std::cmp::Ordering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Verdict of a single strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Observations are equal
    Equal,
    /// Observations are unequal
    Unequal,
    /// Strategy has no opinion; defer to the next one
    NotApplicable,
    /// Strategy cannot judge this pair
    Invalid(ComparisonError),
}

impl Verdict {
    #[inline]
    fn from_bool(equal: bool) -> Self {
        if equal {
            Self::Equal
        } else {
            Self::Unequal
        }
    }

    #[inline]
    fn equal_or_defer(equal: bool) -> Self {
        if equal {
            Self::Equal
        } else {
            Self::NotApplicable
        }
    }
}

/// One link of the comparison chain
pub trait EqualityStrategy<T, E>: Send + Sync {
    /// Strategy name (for diagnostics)
    fn name(&self) -> &'static str;

    /// Judge a control/candidate pair
    fn evaluate(&self, control: &Observation<T, E>, candidate: &Observation<T, E>) -> Verdict;
}

/// Caller-supplied equality over result values
pub trait EqualityComparer<T>: Send + Sync {
    /// Check if the control and candidate values are equal
    fn equals(&self, control: &T, candidate: &T) -> bool;
}

fn both_values<'o, T, E>(
    strategy: &'static str,
    control: &'o Observation<T, E>,
    candidate: &'o Observation<T, E>,
) -> Result<(&'o T, &'o T), Verdict> {
    match (control.value(), candidate.value()) {
        (Some(c), Some(d)) => Ok((c, d)),
        _ => Err(Verdict::Invalid(ComparisonError::ThrownWithCustomEquality {
            strategy,
            candidate: candidate.name().to_string(),
        })),
    }
}

/// Custom comparison function
///
/// Bypasses the rest of the chain. Only meaningful when both sides returned
/// values; a thrown observation yields [`ComparisonError::ThrownWithCustomEquality`].
pub struct CustomComparison<'a, T> {
    compare: Box<dyn Fn(&T, &T) -> bool + Send + Sync + 'a>,
}

impl<'a, T> CustomComparison<'a, T> {
    /// Wrap a comparison function
    pub fn new(compare: impl Fn(&T, &T) -> bool + Send + Sync + 'a) -> Self {
        Self {
            compare: Box::new(compare),
        }
    }
}

impl<T, E> EqualityStrategy<T, E> for CustomComparison<'_, T> {
    fn name(&self) -> &'static str {
        "custom_comparison"
    }

    fn evaluate(&self, control: &Observation<T, E>, candidate: &Observation<T, E>) -> Verdict {
        match both_values(EqualityStrategy::<T, E>::name(self), control, candidate) {
            Ok((c, d)) => Verdict::from_bool((self.compare)(c, d)),
            Err(verdict) => verdict,
        }
    }
}

/// Custom equality comparer
///
/// Same contract as [`CustomComparison`], for comparers implemented as types.
pub struct CustomComparer<'a, T> {
    comparer: Arc<dyn EqualityComparer<T> + 'a>,
}

impl<'a, T> CustomComparer<'a, T> {
    /// Wrap a shared comparer
    pub fn new(comparer: Arc<dyn EqualityComparer<T> + 'a>) -> Self {
        Self { comparer }
    }
}

impl<T, E> EqualityStrategy<T, E> for CustomComparer<'_, T> {
    fn name(&self) -> &'static str {
        "custom_comparer"
    }

    fn evaluate(&self, control: &Observation<T, E>, candidate: &Observation<T, E>) -> Verdict {
        match both_values(EqualityStrategy::<T, E>::name(self), control, candidate) {
            Ok((c, d)) => Verdict::from_bool(self.comparer.equals(c, d)),
            Err(verdict) => verdict,
        }
    }
}

/// Thrown outcome identity
///
/// Applies when either side threw. Both must have thrown, with the same type
/// identity (error type and enum variant, or both panics) and byte-equal
/// messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrownEquality;

impl<T, E: fmt::Display> EqualityStrategy<T, E> for ThrownEquality {
    fn name(&self) -> &'static str {
        "thrown_identity"
    }

    fn evaluate(&self, control: &Observation<T, E>, candidate: &Observation<T, E>) -> Verdict {
        match (control.outcome(), candidate.outcome()) {
            (Outcome::Value(_), Outcome::Value(_)) => Verdict::NotApplicable,
            (Outcome::Error(c), Outcome::Error(d)) => Verdict::from_bool(
                std::mem::discriminant(c) == std::mem::discriminant(d)
                    && c.to_string() == d.to_string(),
            ),
            (Outcome::Panic(c), Outcome::Panic(d)) => Verdict::from_bool(c.message() == d.message()),
            _ => Verdict::Unequal,
        }
    }
}

/// Both values represent "no value"
///
/// What counts as absent is decided by the caller (`Option::is_none`, an
/// empty collection, a sentinel).
pub struct AbsentEquality<'a, T> {
    is_absent: Box<dyn Fn(&T) -> bool + Send + Sync + 'a>,
}

impl<'a, T> AbsentEquality<'a, T> {
    /// Wrap an absence probe
    pub fn new(is_absent: impl Fn(&T) -> bool + Send + Sync + 'a) -> Self {
        Self {
            is_absent: Box::new(is_absent),
        }
    }
}

impl<T, E> EqualityStrategy<T, E> for AbsentEquality<'_, T> {
    fn name(&self) -> &'static str {
        "absent"
    }

    fn evaluate(&self, control: &Observation<T, E>, candidate: &Observation<T, E>) -> Verdict {
        match (control.value(), candidate.value()) {
            (Some(c), Some(d)) => Verdict::equal_or_defer((self.is_absent)(c) && (self.is_absent)(d)),
            _ => Verdict::NotApplicable,
        }
    }
}

/// `PartialEq` of the result type
///
/// Evaluated as `control.eq(candidate)`: the control's notion of equality is
/// authoritative and the pair is not re-checked the other way round.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEquality;

impl<T: PartialEq, E> EqualityStrategy<T, E> for NativeEquality {
    fn name(&self) -> &'static str {
        "native"
    }

    fn evaluate(&self, control: &Observation<T, E>, candidate: &Observation<T, E>) -> Verdict {
        match (control.value(), candidate.value()) {
            (Some(c), Some(d)) => Verdict::equal_or_defer(c.eq(d)),
            _ => Verdict::NotApplicable,
        }
    }
}

/// `Ord` of the result type
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderingEquality;

impl<T: Ord, E> EqualityStrategy<T, E> for OrderingEquality {
    fn name(&self) -> &'static str {
        "ordering"
    }

    fn evaluate(&self, control: &Observation<T, E>, candidate: &Observation<T, E>) -> Verdict {
        match (control.value(), candidate.value()) {
            (Some(c), Some(d)) => Verdict::equal_or_defer(c.cmp(d) == Ordering::Equal),
            _ => Verdict::NotApplicable,
        }
    }
}

/// Ordered chain of equality strategies
pub struct ResultComparator<'a, T, E> {
    strategies: Vec<Box<dyn EqualityStrategy<T, E> + 'a>>,
}

impl<'a, T, E> ResultComparator<'a, T, E> {
    /// Create comparator from strategies in evaluation order
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn EqualityStrategy<T, E> + 'a>>) -> Self {
        Self { strategies }
    }

    /// Strategy names in evaluation order
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Number of strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if the chain is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Compare a candidate observation with the control observation
    ///
    /// # Errors
    /// Returns `ComparisonError` if the deciding strategy cannot judge the
    /// pair or panics.
    pub fn compare(
        &self,
        control: &Observation<T, E>,
        candidate: &Observation<T, E>,
    ) -> Result<bool, ComparisonError> {
        for strategy in &self.strategies {
            let verdict = panic::catch_unwind(AssertUnwindSafe(|| {
                strategy.evaluate(control, candidate)
            }))
            .map_err(|payload| ComparisonError::Panicked {
                strategy: strategy.name(),
                candidate: candidate.name().to_string(),
                message: panic_message(payload.as_ref()),
            })?;

            match verdict {
                Verdict::Equal => return Ok(true),
                Verdict::Unequal => return Ok(false),
                Verdict::NotApplicable => {}
                Verdict::Invalid(err) => return Err(err),
            }
        }

        Ok(false)
    }
}

impl<T, E> fmt::Debug for ResultComparator<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultComparator")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        InvalidOperation(String),
        Argument(String),
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::InvalidOperation(m) | Self::Argument(m) => f.write_str(m),
            }
        }
    }

    type Obs<T> = Observation<T, TestError>;

    fn value<T>(name: &str, v: T) -> Obs<T> {
        Observation::observe(name, || Ok(v))
    }

    fn error<T>(name: &str, e: TestError) -> Obs<T> {
        Observation::observe(name, || Err(e))
    }

    fn default_chain<'a, T: PartialEq + 'a>() -> ResultComparator<'a, T, TestError> {
        ResultComparator::new(vec![Box::new(ThrownEquality), Box::new(NativeEquality)])
    }

    struct CaseInsensitive;

    impl EqualityComparer<String> for CaseInsensitive {
        fn equals(&self, control: &String, candidate: &String) -> bool {
            control.eq_ignore_ascii_case(candidate)
        }
    }

    #[test]
    fn native_equal_values() {
        let cmp = default_chain();
        assert!(cmp.compare(&value("control", 42), &value("new", 42)).unwrap());
        assert!(!cmp.compare(&value("control", 1), &value("new", 2)).unwrap());
    }

    #[test]
    fn custom_comparison_bypasses_chain() {
        let cmp: ResultComparator<'_, i32, TestError> = ResultComparator::new(vec![
            Box::new(CustomComparison::new(|_: &i32, _: &i32| true)),
            Box::new(ThrownEquality),
            Box::new(NativeEquality),
        ]);
        assert!(cmp.compare(&value("control", 1), &value("new", 2)).unwrap());
    }

    #[test]
    fn custom_comparison_refuses_thrown_observations() {
        let cmp: ResultComparator<'_, i32, TestError> =
            ResultComparator::new(vec![Box::new(CustomComparison::new(|a: &i32, b: &i32| a == b))]);
        let err = cmp
            .compare(
                &value("control", 1),
                &error("new", TestError::Argument("x".into())),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ComparisonError::ThrownWithCustomEquality {
                strategy: "custom_comparison",
                candidate: "new".to_string(),
            }
        );
    }

    #[test]
    fn custom_comparer_applies() {
        let cmp: ResultComparator<'_, String, TestError> = ResultComparator::new(vec![
            Box::new(CustomComparer::new(Arc::new(CaseInsensitive))),
            Box::new(ThrownEquality),
            Box::new(NativeEquality),
        ]);
        assert!(cmp
            .compare(&value("control", "Hello".to_string()), &value("new", "HELLO".to_string()))
            .unwrap());
    }

    #[test]
    fn same_error_type_and_message_are_equal() {
        let cmp = default_chain::<i32>();
        let c = error("control", TestError::InvalidOperation("x".into()));
        let d = error("new", TestError::InvalidOperation("x".into()));
        assert!(cmp.compare(&c, &d).unwrap());
    }

    #[test]
    fn same_error_type_different_message_is_unequal() {
        let cmp = default_chain::<i32>();
        let c = error("control", TestError::InvalidOperation("x".into()));
        let d = error("new", TestError::InvalidOperation("y".into()));
        assert!(!cmp.compare(&c, &d).unwrap());
    }

    #[test]
    fn different_error_type_same_message_is_unequal() {
        let cmp = default_chain::<i32>();
        let c = error("control", TestError::InvalidOperation("x".into()));
        let d = error("new", TestError::Argument("x".into()));
        assert!(!cmp.compare(&c, &d).unwrap());
    }

    #[test]
    fn one_sided_error_is_unequal() {
        let cmp = default_chain::<i32>();
        let c = error("control", TestError::InvalidOperation("x".into()));
        assert!(!cmp.compare(&c, &value("new", 1)).unwrap());
        assert!(!cmp.compare(&value("control", 1), &c).unwrap());
    }

    #[test]
    fn panics_compare_by_message() {
        let cmp = default_chain::<i32>();
        let c: Obs<i32> = Observation::observe("control", || panic!("boom"));
        let d: Obs<i32> = Observation::observe("new", || panic!("boom"));
        let e: Obs<i32> = Observation::observe("other", || panic!("bang"));
        assert!(cmp.compare(&c, &d).unwrap());
        assert!(!cmp.compare(&c, &e).unwrap());
    }

    #[test]
    fn error_and_panic_are_different_identities() {
        let cmp = default_chain::<i32>();
        let c = error("control", TestError::InvalidOperation("boom".into()));
        let d: Obs<i32> = Observation::observe("new", || panic!("boom"));
        assert!(!cmp.compare(&c, &d).unwrap());
    }

    #[test]
    fn absent_values_are_equal() {
        #[derive(Debug)]
        struct Opaque(Option<u8>);

        let cmp: ResultComparator<'_, Opaque, TestError> = ResultComparator::new(vec![
            Box::new(ThrownEquality),
            Box::new(AbsentEquality::new(|v: &Opaque| v.0.is_none())),
        ]);
        assert!(cmp.compare(&value("control", Opaque(None)), &value("new", Opaque(None))).unwrap());
        assert!(!cmp
            .compare(&value("control", Opaque(Some(1))), &value("new", Opaque(Some(1))))
            .unwrap());
    }

    #[test]
    fn ordering_equality_is_a_fallback() {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
        struct Version(u32);

        let cmp: ResultComparator<'_, Version, TestError> =
            ResultComparator::new(vec![Box::new(ThrownEquality), Box::new(OrderingEquality)]);
        assert!(cmp.compare(&value("control", Version(3)), &value("new", Version(3))).unwrap());
        assert!(!cmp.compare(&value("control", Version(3)), &value("new", Version(4))).unwrap());
    }

    #[test]
    fn empty_chain_is_unequal() {
        let cmp: ResultComparator<'_, i32, TestError> = ResultComparator::new(Vec::new());
        assert!(cmp.is_empty());
        assert!(!cmp.compare(&value("control", 1), &value("new", 1)).unwrap());
    }

    #[test]
    fn panicking_strategy_is_reported() {
        let cmp: ResultComparator<'_, i32, TestError> = ResultComparator::new(vec![Box::new(
            CustomComparison::new(|_: &i32, _: &i32| -> bool { panic!("comparer bug") }),
        )]);
        let err = cmp.compare(&value("control", 1), &value("new", 1)).unwrap_err();
        assert!(matches!(
            err,
            ComparisonError::Panicked { strategy: "custom_comparison", ref message, .. } if message == "comparer bug"
        ));
    }

    #[test]
    fn strategy_names_in_order() {
        let cmp = default_chain::<i32>();
        assert_eq!(cmp.strategy_names(), vec!["thrown_identity", "native"]);
    }

    proptest! {
        #[test]
        fn prop_equal_values_compare_equal(v in any::<i64>()) {
            let cmp = default_chain::<i64>();
            prop_assert!(cmp.compare(&value("control", v), &value("new", v)).unwrap());
        }

        #[test]
        fn prop_equal_strings_compare_equal(s in ".*") {
            let cmp = default_chain::<String>();
            prop_assert!(cmp.compare(&value("control", s.clone()), &value("new", s)).unwrap());
        }

        #[test]
        fn prop_default_chain_matches_partial_eq(a in any::<i32>(), b in any::<i32>()) {
            let cmp = default_chain::<i32>();
            prop_assert_eq!(cmp.compare(&value("control", a), &value("new", b)).unwrap(), a == b);
        }
    }
}
