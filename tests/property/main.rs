// tests/property/main.rs

use proptest::prelude::*;
use runbook::console::format_prefix;
use runbook::engine::restart::{RetryBudget, RetryDecision};
use runbook::types::format_seconds;

proptest! {
    // A bounded budget hands out exactly `max` retries, numbered 1..=max,
    // and reports exhaustion from then on.
    #[test]
    fn bounded_budget_allows_exactly_max_retries(max in 1u32..50, extra in 1u32..10) {
        let mut budget = RetryBudget::new(max);
        for attempt in 1..=max {
            prop_assert_eq!(budget.next(), RetryDecision::Retry { attempt, max: Some(max) });
        }
        for _ in 0..extra {
            prop_assert_eq!(budget.next(), RetryDecision::Exhausted { max });
        }
        prop_assert_eq!(budget.used(), max + extra);
    }

    #[test]
    fn unbounded_budget_never_exhausts(calls in 1usize..500) {
        let mut budget = RetryBudget::new(0);
        prop_assert_eq!(budget.max(), None);
        for _ in 0..calls {
            let is_retry = matches!(budget.next(), RetryDecision::Retry { max: None, .. });
            prop_assert!(is_retry);
        }
    }

    #[test]
    fn prefixes_stay_short_and_end_with_the_marker(
        id in 1usize..1000,
        text in "[a-z:_ -]{0,120}",
        show_id in any::<bool>(),
    ) {
        let rendered = format_prefix(id, &text, show_id);
        prop_assert!(rendered.ends_with(" ⟫"));

        let body = rendered.strip_suffix(" ⟫").unwrap_or(&rendered);
        let body = if show_id {
            let expected = format!("{id} ");
            prop_assert!(body.starts_with(&expected));
            &body[expected.len()..]
        } else {
            body
        };

        if text.chars().count() > 50 {
            prop_assert_eq!(body.chars().count(), 50);
            prop_assert!(body.ends_with("..."));
        } else {
            prop_assert_eq!(body, text.as_str());
        }
    }

    #[test]
    fn whole_seconds_have_no_decimals(secs in 0u32..100_000) {
        prop_assert_eq!(format_seconds(f64::from(secs)), secs.to_string());
    }
}
