// Policy evaluation and nonce leasing benchmarks.
//
// Policy evaluation builds a fresh interpreter per call, so its cost is the
// per-request overhead every submission pays before signing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use alloy::primitives::Address;
use keyward_gateway::nonce::{LocalNonceCounter, NonceSequencer};
use keyward_gateway::policy::{LuaPolicyEngine, PolicyEvaluator};
use keyward_gateway::CandidateTransaction;

const RECIPIENT: &str = "0x5597285BbE81BaF351e2C0884e9a5f4416958862";

fn candidate(data_len: usize) -> CandidateTransaction {
    CandidateTransaction {
        to: Some(RECIPIENT.to_string()),
        value: "10000000000".to_string(),
        data: vec![0xAB; data_len],
    }
}

fn bench_policy_trivial(c: &mut Criterion) {
    let engine = LuaPolicyEngine::default();
    let tx = candidate(0);
    let source = "function validate(tx) return true end";

    c.bench_function("policy/evaluate_trivial", |b| {
        b.iter(|| engine.evaluate(black_box(source), black_box(&tx)).unwrap());
    });
}

fn bench_policy_allowlist(c: &mut Criterion) {
    let engine = LuaPolicyEngine::default();
    let source = format!(
        r#"
        local allowed = {{ ["{RECIPIENT}"] = true }}
        for i = 1, 200 do allowed[string.format("0x%040x", i)] = true end
        function validate(tx)
          return allowed[tx.to] == true and #tx.data < 4096
        end
        "#
    );

    let mut group = c.benchmark_group("policy/allowlist");
    for data_len in [0usize, 256, 4096] {
        let tx = candidate(data_len);
        group.bench_with_input(BenchmarkId::from_parameter(data_len), &tx, |b, tx| {
            b.iter(|| engine.evaluate(black_box(&source), black_box(tx)).unwrap());
        });
    }
    group.finish();
}

fn bench_nonce_lease(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let counter = LocalNonceCounter::new();
    let account = Address::ZERO;
    counter.seed(account, 0);

    c.bench_function("nonce/local_lease_commit", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let lease = counter.next(account).await.unwrap();
                lease.commit();
            })
        });
    });
}

criterion_group!(
    benches,
    bench_policy_trivial,
    bench_policy_allowlist,
    bench_nonce_lease
);
criterion_main!(benches);
