//! End-to-end evaluation scenarios over loaded rule files.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use helpdesk_gate::error::{is_approval_required, is_denied};
use helpdesk_gate::policy::loader::load_with_env;
use helpdesk_gate::policy::trace::SkipReason;
use helpdesk_gate::policy::{
    Action, Effect, EngineOptions, PolicyEngine, PolicyError, Principal, Request, RequestContext,
    Resource,
};

const PROD_PROTECT: &str = r#"
policies:
  - name: prod-protect
    resources:
      - type: database
        match:
          tags: [production]
    rules:
      - action: destructive
        effect: deny
        message: "no deletes on prod"
"#;

fn engine(rules: &str, options: EngineOptions) -> anyhow::Result<PolicyEngine> {
    let config = load_with_env(rules.as_bytes(), |_| None)?;
    Ok(PolicyEngine::new(config, options))
}

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap()
}

fn request(action: Action, tags: &[&str]) -> Request {
    Request {
        principal: Principal {
            user_id: "oncall".to_string(),
            roles: vec!["sre".to_string()],
            service: "helpdesk-db-agent".to_string(),
        },
        resource: Resource {
            resource_type: "database".to_string(),
            name: "orders-db".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            ..Resource::default()
        },
        action,
        context: RequestContext {
            timestamp: Some(at()),
            trace_id: "t-1".to_string(),
            ..RequestContext::default()
        },
    }
}

#[test]
fn test_prod_delete_denied_by_matching_policy() -> anyhow::Result<()> {
    let engine = engine(PROD_PROTECT, EngineOptions::default())?;
    let decision = engine.evaluate(&request(Action::Destructive, &["production"]));

    assert_eq!(decision.effect, Effect::Deny);
    assert_eq!(decision.policy_name, "prod-protect");
    assert_eq!(decision.message, "no deletes on prod");
    assert_eq!(decision.rule_index, Some(0));
    Ok(())
}

#[test]
fn test_untagged_mismatch_falls_to_default() -> anyhow::Result<()> {
    for default_effect in [Effect::Deny, Effect::Allow, Effect::RequireApproval] {
        let engine = engine(
            PROD_PROTECT,
            EngineOptions {
                default_effect,
                dry_run: false,
            },
        )?;
        let trace = engine.explain(&request(Action::Destructive, &["staging"]));

        assert_eq!(trace.decision.effect, default_effect);
        assert_eq!(trace.decision.policy_name, "default");
        assert!(trace.default_applied);
        assert_eq!(trace.policies[0].skip_reason, Some(SkipReason::ResourceMismatch));
    }
    Ok(())
}

#[test]
fn test_blast_radius_ceiling() -> anyhow::Result<()> {
    let rules = r#"
policies:
  - name: bulk-updates
    resources: [{type: database}]
    rules:
      - action: write
        effect: allow
        conditions:
          max_rows_affected: 100
"#;
    let engine = engine(rules, EngineOptions::default())?;

    let mut small = request(Action::Write, &[]);
    small.context.rows_affected = 50;
    assert_eq!(engine.evaluate(&small).effect, Effect::Allow);

    let mut at_limit = request(Action::Write, &[]);
    at_limit.context.rows_affected = 100;
    assert_eq!(engine.evaluate(&at_limit).effect, Effect::Allow);

    let mut large = request(Action::Write, &[]);
    large.context.rows_affected = 150;
    let decision = engine.evaluate(&large);
    assert_eq!(decision.effect, Effect::Deny);
    assert!(decision.message.contains("150"));
    assert!(decision.message.contains("100"));
    Ok(())
}

#[test]
fn test_duplicate_policy_names_rejected() {
    let rules = r#"
policies:
  - name: prod-protect
    resources: [{type: database}]
    rules: [{action: read, effect: allow}]
  - name: prod-protect
    resources: [{type: kubernetes}]
    rules: [{action: read, effect: allow}]
"#;
    let err = load_with_env(rules.as_bytes(), |_| None).unwrap_err();
    assert!(matches!(err, PolicyError::DuplicateName { .. }));
    assert!(err.to_string().contains("prod-protect"));
}

#[test]
fn test_first_match_wins_and_stops_evaluation() -> anyhow::Result<()> {
    let rules = r#"
policies:
  - name: low-allow
    priority: 1
    resources: [{type: database}]
    rules: [{action: write, effect: allow}]
  - name: skipped-first
    priority: 90
    principals: [{user: someone-else}]
    resources: [{type: database}]
    rules: [{action: write, effect: allow}]
  - name: high-deny
    priority: 50
    resources: [{type: database}]
    rules: [{action: write, effect: deny, message: "writes frozen"}]
  - name: mid-approval
    priority: 20
    resources: [{type: database}]
    rules: [{action: write, effect: require_approval}]
"#;
    let engine = engine(rules, EngineOptions::default())?;
    let trace = engine.explain(&request(Action::Write, &[]));

    assert_eq!(trace.decision.policy_name, "high-deny");
    let names: Vec<&str> = trace.policies.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["skipped-first", "high-deny"]);
    Ok(())
}

#[test]
fn test_approval_upgrade_and_gate_errors() -> anyhow::Result<()> {
    let rules = r#"
policies:
  - name: schema-changes
    principals: [{role: sre}, {service: helpdesk-db-agent}]
    resources:
      - type: database
        match: {name_pattern: "orders-*"}
    rules:
      - action: [write, destructive]
        effect: allow
        message: "schema changes need a second pair of eyes"
        conditions:
          require_approval: true
          approval_quorum: 2
"#;
    let engine = engine(rules, EngineOptions::default())?;
    let trace = engine.explain(&request(Action::Write, &[]));

    assert_eq!(trace.decision.effect, Effect::RequireApproval);
    assert!(trace.decision.requires_approval);
    assert_eq!(trace.decision.approval_quorum, 2);

    let err = anyhow::Error::new(trace.must_allow().unwrap_err()).context("running psql");
    assert!(is_approval_required(err.as_ref()));
    assert!(!is_denied(err.as_ref()));
    assert_eq!(
        err.root_cause().to_string(),
        "schema changes need a second pair of eyes"
    );
    Ok(())
}

#[test]
fn test_denial_error_carries_explanation() -> anyhow::Result<()> {
    let engine = engine(PROD_PROTECT, EngineOptions::default())?;
    let trace = engine.explain(&request(Action::Destructive, &["production"]));

    let err = trace.must_allow().unwrap_err();
    assert!(err.is_denied());
    assert_eq!(err.to_string(), trace.explanation);
    assert!(err.to_string().contains("Denied: no deletes on prod"));

    let bare = trace.decision.must_allow().unwrap_err();
    assert_eq!(bare.to_string(), "no deletes on prod");
    Ok(())
}

#[test]
fn test_dry_run_allows_but_explains_denial() -> anyhow::Result<()> {
    let real = engine(PROD_PROTECT, EngineOptions::default())?;
    let staged = engine(
        PROD_PROTECT,
        EngineOptions {
            dry_run: true,
            ..EngineOptions::default()
        },
    )?;
    let req = request(Action::Destructive, &["production"]);

    let real_trace = real.explain(&req);
    let staged_trace = staged.explain(&req);

    assert!(staged_trace.must_allow().is_ok());
    assert_eq!(staged_trace.decision.message, "[DRY RUN] no deletes on prod");
    assert_eq!(staged_trace.policies, real_trace.policies);
    assert_eq!(staged_trace.explanation, real_trace.explanation);
    assert!(staged_trace.explanation.contains("Decision: DENIED"));

    // The default denial is overridden as well.
    let read = staged.evaluate(&request(Action::Read, &["staging"]));
    assert_eq!(read.effect, Effect::Allow);
    assert!(read.message.starts_with("[DRY RUN] "));
    Ok(())
}

#[test]
fn test_post_execution_recheck_uses_measured_counts() -> anyhow::Result<()> {
    let rules = r#"
policies:
  - name: restarts
    resources:
      - type: kubernetes
        match: {namespace: payments}
    rules:
      - action: write
        effect: allow
        conditions: {max_pods_affected: 5}
"#;
    let engine = engine(rules, EngineOptions::default())?;
    let mut req = request(Action::Write, &[]);
    req.resource = Resource {
        resource_type: "kubernetes".to_string(),
        name: "checkout".to_string(),
        namespace: "payments".to_string(),
        ..Resource::default()
    };

    assert!(engine.evaluate(&req).is_allowed());
    req.context.pods_affected = 12;
    let after = engine.evaluate(&req);
    assert!(after.is_denied());
    assert!(after.message.contains("12 pods affected, limit is 5"));
    Ok(())
}

#[test]
fn test_untagged_default_explanation_lists_tags() -> anyhow::Result<()> {
    let engine = engine(PROD_PROTECT, EngineOptions::default())?;
    let trace = engine.explain(&request(Action::Destructive, &[]));

    assert!(trace.default_applied);
    assert!(trace.explanation.contains("[production]: prod-protect"));
    Ok(())
}

#[test]
fn test_concurrent_evaluation_shares_engine() -> anyhow::Result<()> {
    let engine = Arc::new(engine(PROD_PROTECT, EngineOptions::default())?);
    let expected = engine.evaluate(&request(Action::Destructive, &["production"]));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            let expected = expected.clone();
            scope.spawn(move || {
                for _ in 0..100 {
                    let decision = engine.evaluate(&request(Action::Destructive, &["production"]));
                    assert_eq!(decision, expected);
                }
            });
        }
    });
    Ok(())
}
