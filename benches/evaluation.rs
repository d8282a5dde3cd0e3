use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use statsig::{
    eval::Evaluator,
    specs::{SpecKind, Specs},
    StatsigUser,
};

fn specs() -> Specs {
    let payload = json!({
        "time": 1,
        "feature_gates": [
            {
                "name": "public_gate", "type": "feature_gate", "salt": "s1", "enabled": true,
                "defaultValue": false, "idType": "userID",
                "rules": [{"id": "public", "passPercentage": 100.0, "returnValue": true,
                           "conditions": [{"type": "public"}]}]
            },
            {
                "name": "us_rollout", "type": "feature_gate", "salt": "s2", "enabled": true,
                "defaultValue": false, "idType": "userID",
                "rules": [{"id": "us", "passPercentage": 50.0, "returnValue": true, "salt": "r2",
                           "conditions": [{"type": "user_field", "field": "country",
                                           "operator": "any", "targetValue": ["US", "CA"]}]}]
            },
            {
                "name": "nested", "type": "feature_gate", "salt": "s3", "enabled": true,
                "defaultValue": false, "idType": "userID",
                "rules": [{"id": "nested", "passPercentage": 100.0, "returnValue": true,
                           "conditions": [{"type": "pass_gate", "targetValue": "us_rollout"}]}]
            }
        ]
    });
    Specs::from_json(&payload.to_string()).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let evaluator = Evaluator::new(Arc::new(specs()));
    let user = StatsigUser::with_user_id("user1").with_country("US");

    let mut group = c.benchmark_group("check_gate");
    group.throughput(Throughput::Elements(1));
    for name in ["public_gate", "us_rollout", "nested"] {
        group.bench_function(name, |b| {
            b.iter(|| evaluator.evaluate(black_box(SpecKind::Gate), black_box(name), black_box(&user)))
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
