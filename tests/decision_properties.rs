//! Property tests for evaluation invariants.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use helpdesk_gate::policy::loader::load_with_env;
use helpdesk_gate::policy::{
    Action, Effect, EngineOptions, PolicyEngine, Principal, Request, RequestContext, Resource,
};

const STAGED_RULES: &str = r#"
policies:
  - name: freeze-window
    priority: 100
    resources: [{type: database, match: {tags: [production]}}]
    rules:
      - action: [write, destructive]
        effect: deny
        message: "weekend freeze"
        conditions:
          schedule: {days: [sat, sun]}
  - name: prod-writes
    priority: 50
    resources: [{type: database, match: {tags: [production]}}]
    rules:
      - action: write
        effect: allow
        conditions: {require_approval: true, max_rows_affected: 500}
      - action: destructive
        effect: deny
        message: "no deletes on prod"
  - name: staging
    priority: 10
    principals: [{role: dev}]
    resources: [{type: database, match: {tags: [staging]}}]
    rules:
      - action: [read, write, destructive]
        effect: allow
        conditions: {max_rows_affected: 10000}
"#;

fn engine(rules: &str, dry_run: bool) -> PolicyEngine {
    let config = load_with_env(rules.as_bytes(), |_| None).unwrap();
    PolicyEngine::new(
        config,
        EngineOptions {
            dry_run,
            ..EngineOptions::default()
        },
    )
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Read),
        Just(Action::Write),
        Just(Action::Destructive)
    ]
}

fn effect() -> impl Strategy<Value = Effect> {
    prop_oneof![
        Just(Effect::Allow),
        Just(Effect::Deny),
        Just(Effect::RequireApproval)
    ]
}

/// Any hour of the week starting Monday 2024-06-03.
fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..7 * 24, 0i64..60).prop_map(|(hours, minutes)| {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
            + Duration::hours(hours)
            + Duration::minutes(minutes)
    })
}

prop_compose! {
    fn request()(
        action in action(),
        tags in proptest::sample::subsequence(vec!["production", "staging", "pci"], 0..=3),
        roles in proptest::sample::subsequence(vec!["dev", "sre"], 0..=2),
        rows in 0u64..20_000,
        pods in 0u64..50,
        at in timestamp(),
    ) -> Request {
        Request {
            principal: Principal {
                user_id: "agent-user".to_string(),
                roles: roles.into_iter().map(String::from).collect(),
                service: String::new(),
            },
            resource: Resource {
                resource_type: "database".to_string(),
                name: "orders".to_string(),
                tags: tags.into_iter().map(String::from).collect(),
                ..Resource::default()
            },
            action,
            context: RequestContext {
                timestamp: Some(at),
                trace_id: "prop".to_string(),
                rows_affected: rows,
                pods_affected: pods,
            },
        }
    }
}

proptest! {
    #[test]
    fn blast_radius_is_monotonic(
        declared in effect(),
        approval in any::<bool>(),
        limit in 0u64..1_000,
        rows in 0u64..2_000,
    ) {
        let rules = format!(
            "policies:\n  - name: ceiling\n    resources: [{{type: database}}]\n    rules:\n      - action: write\n        effect: {}\n        conditions: {{require_approval: {}, max_rows_affected: {}}}\n",
            declared, approval, limit
        );
        let engine = engine(&rules, false);
        let mut req = Request {
            principal: Principal::default(),
            resource: Resource { resource_type: "database".to_string(), ..Resource::default() },
            action: Action::Write,
            context: RequestContext { rows_affected: rows, ..RequestContext::default() },
        };
        req.context.timestamp = Some(Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap());
        let decision = engine.evaluate(&req);

        if rows > limit {
            prop_assert_eq!(decision.effect, Effect::Deny);
        } else if approval && declared == Effect::Allow {
            prop_assert_eq!(decision.effect, Effect::RequireApproval);
        } else {
            prop_assert_eq!(decision.effect, declared);
        }
        if approval {
            prop_assert!(decision.requires_approval);
            prop_assert!(decision.approval_quorum >= 1);
        }
    }

    #[test]
    fn dry_run_preserves_trace(req in request()) {
        let real = engine(STAGED_RULES, false).explain(&req);
        let dry = engine(STAGED_RULES, true).explain(&req);

        prop_assert_eq!(dry.decision.effect, Effect::Allow);
        prop_assert_eq!(&dry.policies, &real.policies);
        prop_assert_eq!(&dry.explanation, &real.explanation);
        prop_assert_eq!(&dry.evaluated, &real.decision);
        prop_assert_eq!(dry.default_applied, real.default_applied);

        if real.decision.effect == Effect::Allow {
            prop_assert_eq!(&dry.decision.message, &real.decision.message);
        } else {
            prop_assert_eq!(
                dry.decision.message.clone(),
                format!("[DRY RUN] {}", real.decision.message)
            );
        }
    }

    #[test]
    fn evaluation_is_total_and_deterministic(req in request()) {
        let engine = engine(STAGED_RULES, false);
        let first = engine.explain(&req);
        let second = engine.explain(&req);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(engine.evaluate(&req), first.decision.clone());
        prop_assert_eq!(first.default_applied, first.decision.policy_name == "default");
        if first.default_applied {
            prop_assert_eq!(first.decision.effect, Effect::Deny);
        } else {
            // The winner is the last policy traced, and only it has a winning rule.
            let last = first.policies.last().unwrap();
            prop_assert_eq!(&last.name, &first.decision.policy_name);
            prop_assert!(last.winning_rule().is_some());
            let winners = first.policies.iter().filter(|p| p.winning_rule().is_some()).count();
            prop_assert_eq!(winners, 1);
        }
    }
}
