use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use zai_bridge::auth::{authenticate, build_allowed_key_set};
use zai_bridge::config::{AppConfig, ClientAuthConfig, UpstreamConfig};
use zai_bridge::protocol::openai_chat::OpenAiChatRequest;
use zai_bridge::protocol::zai::encoder::encode_zai_request;
use zai_bridge::stream::{ChunkEncoder, CompletionAggregator, SessionTranslator};

fn event_line(data: &serde_json::Value) -> String {
    format!(
        "data: {}\n\n",
        json!({"type": "chat:completion", "data": data})
    )
}

fn answer_stream(deltas: usize) -> Vec<u8> {
    let mut body = event_line(&json!({
        "phase": "thinking",
        "id": "chat-bench",
        "model": "glm-4.5",
        "delta_content": "<details>\n<summary>Thinking…</summary>\n> planning the reply"
    }));
    body.push_str(&event_line(&json!({"phase": "answer", "edit_content": "</details>\n"})));
    for idx in 0..deltas {
        body.push_str(&event_line(
            &json!({"phase": "answer", "delta_content": format!("token {idx} ")}),
        ));
    }
    body.push_str(&event_line(&json!({
        "phase": "answer",
        "usage": {"prompt_tokens": 12, "completion_tokens": deltas, "total_tokens": deltas + 12}
    })));
    body.into_bytes()
}

fn tool_call_stream(argument_fragments: usize) -> Vec<u8> {
    let block = format!(
        "<glm_block >{}</glm_block>",
        json!({"type": "mcp", "data": {"metadata": {
            "id": "call_bench",
            "name": "search",
            "arguments": "{\"query\":\"rust",
        }}})
    );
    let mut body = event_line(&json!({"phase": "tool_call", "id": "chat-bench", "edit_content": block}));
    for _ in 0..argument_fragments {
        body.push_str(&event_line(&json!({"phase": "tool_call", "edit_content": " streams"})));
    }
    body.push_str(&event_line(&json!({
        "phase": "tool_call",
        "edit_content": "\\\", \\\"limit\\\": 5}\", \"result\": null}}</glm_block>"
    })));
    body.push_str(&event_line(&json!({"phase": "other", "edit_content": "null, \"display\": true"})));
    body.into_bytes()
}

fn bench_translate(c: &mut Criterion) {
    let answer = answer_stream(200);
    let tools = tool_call_stream(50);

    c.bench_function("translate_answer_200_deltas_4k_chunks", |b| {
        b.iter(|| {
            let mut translator = SessionTranslator::new("glm-4.5");
            let mut out = Vec::with_capacity(256);
            for chunk in black_box(&answer).chunks(4096) {
                translator.feed(chunk, &mut out);
            }
            black_box(out.len());
        });
    });

    c.bench_function("translate_answer_200_deltas_7b_chunks", |b| {
        b.iter(|| {
            let mut translator = SessionTranslator::new("glm-4.5");
            let mut out = Vec::with_capacity(256);
            for chunk in black_box(&answer).chunks(7) {
                translator.feed(chunk, &mut out);
            }
            black_box(out.len());
        });
    });

    c.bench_function("translate_tool_call_50_fragments", |b| {
        b.iter(|| {
            let mut translator = SessionTranslator::new("glm-4.5");
            let mut out = Vec::with_capacity(8);
            translator.feed(black_box(&tools), &mut out);
            black_box(out.len());
        });
    });

    c.bench_function("aggregate_answer_200_deltas", |b| {
        b.iter(|| {
            let mut translator = SessionTranslator::new("glm-4.5");
            let mut out = Vec::with_capacity(256);
            translator.feed(black_box(&answer), &mut out);
            let mut aggregator = CompletionAggregator::default();
            for emitted in out {
                aggregator.push(emitted.fragment);
            }
            black_box(aggregator.into_response(translator.session(), 1_700_000_000));
        });
    });

    c.bench_function("encode_answer_200_frames", |b| {
        b.iter(|| {
            let mut translator = SessionTranslator::new("glm-4.5");
            let mut out = Vec::with_capacity(256);
            translator.feed(black_box(&answer), &mut out);
            let mut encoder = ChunkEncoder::new(1_700_000_000);
            let mut bytes = 0usize;
            for emitted in out {
                if let Ok(frame) = encoder.encode_frame(translator.session(), emitted) {
                    bytes += frame.len();
                }
            }
            black_box(bytes);
        });
    });
}

fn bench_ingress(c: &mut Criterion) {
    let mut allowed = Vec::with_capacity(64);
    for idx in 0..63 {
        allowed.push(format!("k-{idx:03}"));
    }
    allowed.push("client-key".to_string());
    let config = AppConfig {
        client_authentication: ClientAuthConfig {
            allowed_keys: allowed,
        },
        ..AppConfig::default()
    };
    let keys = build_allowed_key_set(&config);
    let mut headers = http::HeaderMap::new();
    headers.insert("authorization", "Bearer client-key".parse().unwrap());
    c.bench_function("auth_multi64_bearer", |b| {
        b.iter(|| black_box(authenticate(black_box(&headers), black_box(&keys)).is_ok()));
    });

    let request: OpenAiChatRequest = serde_json::from_value(json!({
        "model": "glm-4.5",
        "messages": [
            {"role": "system", "content": "You are a helpful assistant"},
            {"role": "user", "content": "What is the weather in SF?"}
        ],
        "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        }}}]
    }))
    .unwrap();
    let upstream = UpstreamConfig::default();
    let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
    c.bench_function("encode_upstream_request", |b| {
        b.iter(|| {
            let body = encode_zai_request(black_box(request.clone()), &upstream, now);
            black_box(serde_json::to_vec(&body).unwrap());
        });
    });
}

criterion_group!(benches, bench_translate, bench_ingress);
criterion_main!(benches);
