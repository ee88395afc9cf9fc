#![no_main]

//! Rule file loading on arbitrary bytes.
//!
//! Loading must return `Ok` or a `PolicyError`, never panic. Accepted
//! configs must be sorted by descending priority with unique names.

use std::collections::HashSet;

use libfuzzer_sys::fuzz_target;

use helpdesk_gate::policy::loader::load_with_env;

fuzz_target!(|data: &[u8]| {
    let lookup = |name: &str| (name.len() % 2 == 0).then(|| "fuzz".to_string());
    let Ok(config) = load_with_env(data, lookup) else {
        return;
    };

    let priorities: Vec<i64> = config.policies().iter().map(|p| p.priority).collect();
    assert!(priorities.windows(2).all(|w| w[0] >= w[1]));

    let mut names = HashSet::new();
    for policy in config.policies() {
        assert!(names.insert(policy.name.as_str()));
        assert!(!policy.rules.is_empty());
        for rule in &policy.rules {
            assert!(!rule.actions.is_empty());
        }
    }
    assert_eq!(config.digest().len(), 64);
});
