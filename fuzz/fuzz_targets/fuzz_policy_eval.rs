#![no_main]

//! Evaluation of arbitrary requests.
//!
//! Every request must produce a decision, repeat evaluation must agree,
//! and a dry-run engine must allow while keeping the same trace.

use std::sync::LazyLock;

use arbitrary::Arbitrary;
use chrono::{DateTime, Utc};
use libfuzzer_sys::fuzz_target;

use helpdesk_gate::policy::loader::load_with_env;
use helpdesk_gate::policy::{
    Action, Effect, EngineOptions, PolicyEngine, Principal, Request, RequestContext, Resource,
};

const RULES: &str = r#"
policies:
  - name: weekend-freeze
    priority: 100
    resources: [{type: database, match: {tags: [production]}}]
    rules:
      - action: [write, destructive]
        effect: deny
        conditions: {schedule: {days: [sat, sun], timezone: America/New_York}}
  - name: prod
    priority: 50
    principals: [{role: sre}, {service: db-agent}]
    resources:
      - type: database
        match: {tags: [production]}
      - type: kubernetes
        match: {namespace: payments, name_pattern: "checkout-*"}
    rules:
      - action: read
        effect: allow
      - action: write
        effect: allow
        conditions: {require_approval: true, approval_quorum: 2, max_rows_affected: 1000, max_pods_affected: 3}
      - action: destructive
        effect: deny
  - name: off
    enabled: false
    resources: [{type: database}]
    rules: [{action: [read, write, destructive], effect: allow}]
"#;

static ENGINES: LazyLock<Option<(PolicyEngine, PolicyEngine)>> = LazyLock::new(|| {
    let config = load_with_env(RULES.as_bytes(), |_| None).ok()?;
    let real = PolicyEngine::new(config.clone(), EngineOptions::default());
    let dry = PolicyEngine::new(
        config,
        EngineOptions {
            dry_run: true,
            ..EngineOptions::default()
        },
    );
    Some((real, dry))
});

#[derive(Debug, Arbitrary)]
struct Input {
    user: String,
    roles: Vec<String>,
    service: String,
    resource_type: u8,
    name: String,
    tags: Vec<String>,
    namespace: String,
    action: u8,
    rows: u64,
    pods: u64,
    seconds: i32,
}

fuzz_target!(|input: Input| {
    let Some((real, dry)) = ENGINES.as_ref() else {
        return;
    };

    let request = Request {
        principal: Principal {
            user_id: input.user,
            roles: input.roles,
            service: input.service,
        },
        resource: Resource {
            resource_type: ["database", "kubernetes", "other"][input.resource_type as usize % 3]
                .to_string(),
            name: input.name,
            tags: input.tags.into_iter().collect(),
            namespace: input.namespace,
            ..Resource::default()
        },
        action: Action::ALL[input.action as usize % Action::ALL.len()],
        context: RequestContext {
            timestamp: DateTime::<Utc>::from_timestamp(i64::from(input.seconds), 0),
            trace_id: "fuzz".to_string(),
            rows_affected: input.rows,
            pods_affected: input.pods,
        },
    };

    let trace = real.explain(&request);
    assert_eq!(real.evaluate(&request), trace.decision);
    if trace.decision.effect == Effect::RequireApproval {
        assert!(trace.decision.approval_quorum >= 1);
    }

    let staged = dry.explain(&request);
    assert_eq!(staged.decision.effect, Effect::Allow);
    assert_eq!(staged.policies, trace.policies);
    assert_eq!(staged.evaluated, trace.decision);
});
