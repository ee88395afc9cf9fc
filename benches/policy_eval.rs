//! Evaluation latency over a realistic rule set.
//!
//! Run with `cargo bench --bench policy_eval`.

use std::hint::black_box;

use chrono::{TimeZone, Utc};
use criterion::{Criterion, criterion_group, criterion_main};

use helpdesk_gate::policy::loader::load_with_env;
use helpdesk_gate::policy::{
    Action, EngineOptions, PolicyEngine, Principal, Request, RequestContext, Resource,
};

/// Twenty filler policies ahead of the ones that actually match.
fn rules() -> String {
    let mut text = String::from("policies:\n");
    for i in 0..20 {
        text.push_str(&format!(
            "  - name: team-{i}\n    priority: {}\n    principals: [{{role: team-{i}}}]\n    resources: [{{type: database, match: {{tags: [team-{i}]}}}}]\n    rules: [{{action: [read, write], effect: allow}}]\n",
            100 + i
        ));
    }
    text.push_str(
        r#"  - name: prod-protect
    priority: 50
    resources: [{type: database, match: {tags: [production]}}]
    rules:
      - action: read
        effect: allow
      - action: write
        effect: allow
        conditions:
          require_approval: true
          max_rows_affected: 1000
          schedule: {days: [mon, tue, wed, thu, fri], timezone: Europe/Berlin}
      - action: destructive
        effect: deny
        message: "no deletes on prod"
"#,
    );
    text
}

fn request(action: Action, tags: &[&str]) -> Request {
    Request {
        principal: Principal {
            user_id: "oncall".to_string(),
            roles: vec!["sre".to_string()],
            service: String::new(),
        },
        resource: Resource {
            resource_type: "database".to_string(),
            name: "orders-db".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Resource::default()
        },
        action,
        context: RequestContext {
            timestamp: Some(Utc.with_ymd_and_hms(2024, 6, 5, 10, 0, 0).unwrap()),
            trace_id: "bench".to_string(),
            rows_affected: 250,
            pods_affected: 0,
        },
    }
}

fn bench_policy_eval(c: &mut Criterion) {
    let config = load_with_env(rules().as_bytes(), |_| None).unwrap();
    let engine = PolicyEngine::new(config, EngineOptions::default());

    let approval = request(Action::Write, &["production"]);
    let default = request(Action::Write, &[]);

    let mut group = c.benchmark_group("policy_eval");
    group.bench_function("evaluate_conditions", |b| {
        b.iter(|| engine.evaluate(black_box(&approval)))
    });
    group.bench_function("evaluate_default", |b| {
        b.iter(|| engine.evaluate(black_box(&default)))
    });
    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let text = rules();
    c.bench_function("load_rules", |b| {
        b.iter(|| load_with_env(black_box(text.as_bytes()), |_| None).unwrap())
    });
}

criterion_group!(benches, bench_policy_eval, bench_load);
criterion_main!(benches);
