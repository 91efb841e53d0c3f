use coach_relay::sanitize::{sanitize_messages, ChatRequest};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

fn conversation(turns: usize) -> Value {
    let mut items = Vec::with_capacity(turns + 2);
    for i in 0..turns {
        let role = if i % 2 == 0 { "user" } else { "assistant" };
        items.push(json!({"role": role, "content": format!("turn {} {}", i, "lorem ipsum ".repeat(8))}));
    }
    // A couple of hostile shapes that must be dropped.
    items.push(json!({"role": "user", "content": {"nested": true}}));
    items.push(json!("plain string"));
    Value::Array(items)
}

fn bench_sanitize(c: &mut Criterion) {
    let short = conversation(4);
    let long = conversation(200);

    c.bench_function("sanitize_short_with_system", |b| {
        b.iter(|| sanitize_messages(black_box(Some(&short)), black_box("You are a coach")))
    });
    c.bench_function("sanitize_long_with_system", |b| {
        b.iter(|| sanitize_messages(black_box(Some(&long)), black_box("You are a coach")))
    });

    let body = json!({
        "model": "gpt-4o-mini",
        "temperature": "0.4",
        "system": "You are a coach",
        "messages": long,
    });
    c.bench_function("chat_request_from_value", |b| {
        b.iter(|| ChatRequest::from_value(black_box(&body)))
    });
}

criterion_group!(benches, bench_sanitize);
criterion_main!(benches);
