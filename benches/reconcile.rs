use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use sheet_sync::index::{self, KeySpec, LookupIndex};
use sheet_sync::matcher::{MatchPolicy, NaturalKey};
use sheet_sync::plan;
use sheet_sync::value::{FieldValue, Payload, StoredRow};

fn craftsman_fields(seed: usize, phone: &str) -> Payload {
    [
        (
            "full_name".to_string(),
            FieldValue::from_text(&format!("Craftsman {seed}")),
        ),
        (
            "associate_number".to_string(),
            FieldValue::from_text(&format!("A-{seed}")),
        ),
        (
            "email".to_string(),
            FieldValue::from_text(&format!("craftsman{seed}@atelier.fr")),
        ),
        ("phone".to_string(), FieldValue::from_text(phone)),
    ]
    .into()
}

fn build_index(records: usize) -> LookupIndex {
    let rows = (0..records)
        .map(|seed| StoredRow::new(format!("c{seed}"), craftsman_fields(seed, "0601020304")))
        .collect();
    LookupIndex::build(
        vec![
            KeySpec::folded(index::EMAIL, "email"),
            KeySpec::exact(index::ASSOCIATE_NUMBER, "associate_number"),
        ],
        rows,
    )
}

fn candidates(records: usize) -> Vec<(Vec<NaturalKey>, Payload)> {
    (0..records)
        .map(|seed| {
            // Every third candidate carries a changed phone, the rest no-op.
            let phone = if seed % 3 == 0 { "0699999999" } else { "0601020304" };
            let keys = vec![
                NaturalKey::new(index::EMAIL, format!("craftsman{seed}@atelier.fr")),
                NaturalKey::new(index::ASSOCIATE_NUMBER, format!("A-{seed}")),
            ];
            (keys, craftsman_fields(seed, phone))
        })
        .collect()
}

fn bench_match_and_classify(c: &mut Criterion) {
    const RECORDS: usize = 5_000;
    let lookup = build_index(RECORDS);
    let policy = MatchPolicy::new(vec![index::EMAIL, index::ASSOCIATE_NUMBER]);

    c.bench_function("match_and_classify_5k", |b| {
        b.iter_batched(
            || candidates(RECORDS),
            |candidates| {
                let mut updates = 0usize;
                for (keys, payload) in &candidates {
                    let existing = policy.find(&lookup, keys);
                    if let plan::RowAction::Update { .. } = plan::classify(existing, payload) {
                        updates += 1;
                    }
                }
                updates
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_match_and_classify);
criterion_main!(benches);
