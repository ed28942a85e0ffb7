//! Property-based tests for capture and substitution

use super::*;
use proptest::prelude::*;

fn test_caps() -> Capabilities {
    Capabilities::default()
}

fn arb_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9.:_-]{1,12}"
}

fn arb_plain_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?()*]{0,60}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Text without a sigil comes back unchanged
    #[test]
    fn prop_apply_without_sigil_is_identity(
        text in arb_plain_text(),
        value in arb_value(),
    ) {
        let caps = test_caps();
        let ctx = ApplyContext::new(&caps, "prop");
        let memory: ScriptingMemory = [("$alpha", value)].into_iter().collect();
        let vm = VariableMemory::new(&caps);
        prop_assert_eq!(vm.apply(&memory, &text, &ctx).unwrap(), text);
    }

    // Applying values and capturing them back restores the memory
    #[test]
    fn prop_apply_then_capture_round_trips(
        alpha in arb_value(),
        beta in arb_value(),
        gamma in arb_value(),
    ) {
        let caps = test_caps();
        let ctx = ApplyContext::new(&caps, "prop");
        let vm = VariableMemory::new(&caps);
        let template = "$alpha $beta $gamma";

        let original: ScriptingMemory = [
            ("$alpha", alpha),
            ("$beta", beta),
            ("$gamma", gamma),
        ]
        .into_iter()
        .collect();
        let rendered = vm.apply(&original, template, &ctx).unwrap();

        let mut captured = ScriptingMemory::new();
        prop_assert!(vm.capture(&mut captured, &rendered, template));
        prop_assert_eq!(captured, original);
    }

    // A variable whose name prefixes another never leaks into it
    #[test]
    fn prop_prefix_names_substitute_independently(
        short in arb_value(),
        long in arb_value(),
    ) {
        let caps = test_caps();
        let ctx = ApplyContext::new(&caps, "prop");
        let vm = VariableMemory::new(&caps);
        let memory: ScriptingMemory = [
            ("$num", short.clone()),
            ("$number", long.clone()),
        ]
        .into_iter()
        .collect();

        let applied = vm.apply(&memory, "$number|$num|$numbers", &ctx).unwrap();
        prop_assert_eq!(applied, format!("{long}|{short}|$numbers"));
    }

    // A shorter name alone in memory is not substituted into longer ones
    #[test]
    fn prop_shorter_name_alone_leaves_longer_literal(
        short in arb_value(),
        suffix in "[a-zA-Z0-9_]{1,8}",
    ) {
        let caps = test_caps();
        let ctx = ApplyContext::new(&caps, "prop");
        let vm = VariableMemory::new(&caps);
        let memory: ScriptingMemory = [("$num", short.clone())].into_iter().collect();

        let template = format!("$num{suffix} $num");
        let applied = vm.apply(&memory, &template, &ctx).unwrap();
        prop_assert_eq!(applied, format!("$num{suffix} {short}"));
    }

    // A failed capture never modifies memory
    #[test]
    fn prop_failed_capture_keeps_memory(
        value in arb_value(),
        actual in "[a-z ]{0,30}",
    ) {
        let caps = test_caps();
        let vm = VariableMemory::new(&caps);
        let mut memory: ScriptingMemory = [("$keep", value)].into_iter().collect();
        let before = memory.clone();

        // The literal digits can never appear in `actual`
        let matched = vm.capture(&mut memory, &actual, "code 12345 $keep");
        prop_assert!(!matched);
        prop_assert_eq!(memory, before);
    }
}
