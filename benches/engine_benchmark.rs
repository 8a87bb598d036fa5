use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_transaction_router::{BkTree, Engine, EngineConfig, SuffixTrie, TransactionRecord};

fn record(n: u32, source: u32, destination: u32, timestamp: i64) -> TransactionRecord {
    TransactionRecord {
        txn_id: format!("B{n:05}"),
        source,
        destination,
        amount: 25.0,
        timestamp,
        description: String::new(),
    }
}

fn bench_process_burst(c: &mut Criterion) {
    c.bench_function("process_burst", |b| {
        b.iter(|| {
            let mut engine = Engine::with_config(EngineConfig::default());
            for i in 0..50 {
                engine.add_account(100_000 + i, 1_000_000.0, 1.5).unwrap();
            }
            for i in 0..200u32 {
                let source = 100_000 + (i % 50);
                let destination = 100_000 + ((i + 7) % 50);
                // 61-second spacing keeps the velocity window clear.
                let _ = black_box(engine.process(record(i, source, destination, i as i64 * 61)));
            }
            engine
        })
    });
}

fn bench_lexical_screen(c: &mut Criterion) {
    c.bench_function("lexical_screen", |b| {
        let mut tree = BkTree::new();
        for word in ["amazon", "paypal", "western", "union", "wire", "invoice"] {
            tree.insert(word);
        }
        let description = "quarterly settlement for consulting services rendered offsite";

        b.iter(|| {
            let word_hit = description
                .split_whitespace()
                .any(|token| tree.find_near(token, 2));
            let mut trie = SuffixTrie::new();
            trie.insert(description);
            black_box(word_hit || trie.contains("offshore"))
        })
    });
}

criterion_group!(benches, bench_process_burst, bench_lexical_screen);
criterion_main!(benches);
