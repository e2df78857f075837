use chatlens::{
    Aggregator, AggregatorOptions, ChatEvent, Command, GradeTable, Lexicon, ManualClock,
    ReadabilityScorer, ScoreCache, WordValidityFilter,
};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

const MESSAGES: &[(&str, &str)] = &[
    ("short", "the dog ran home"),
    ("noisy", "lol the dog ran home brb xqzzv!!"),
    (
        "long",
        "The algorithm is complicated. We should measure the performance before we change \
         anything, because the committee wants a detailed report by tomorrow.",
    ),
];

fn bench_filter(c: &mut Criterion) {
    let filter = WordValidityFilter::new(Lexicon::embedded());
    for &(label, text) in MESSAGES {
        c.bench_with_input(BenchmarkId::new("filter", label), &text, |b, &text| {
            b.iter(|| black_box(filter.filter(text)));
        });
    }
}

fn bench_score(c: &mut Criterion) {
    let filter = WordValidityFilter::new(Lexicon::embedded());
    let scorer = ReadabilityScorer::with_lexicon(Lexicon::embedded(), GradeTable::Decimal);
    for &(label, text) in MESSAGES {
        let filtered = filter.filter(text).into_string();
        c.bench_with_input(BenchmarkId::new("score", label), &filtered, |b, filtered| {
            b.iter(|| black_box(scorer.score(filtered)));
        });
    }
}

fn bench_aggregator(c: &mut Criterion) {
    c.bench_function("aggregator::handle_1000_messages", |b| {
        b.iter(|| {
            let mut aggregator = Aggregator::new(
                Lexicon::embedded(),
                ScoreCache::in_memory(),
                AggregatorOptions::default(),
                Arc::new(ManualClock::at(0)),
            );
            for i in 0..1000u64 {
                let (_, text) = MESSAGES[(i % 3) as usize];
                let nick = format!("user{}", i % 17);
                black_box(aggregator.handle(ChatEvent::message(nick, "host", text, i)));
            }
            black_box(aggregator.command(Command::ShowScores));
        });
    });
}

criterion_group!(benches, bench_filter, bench_score, bench_aggregator);
criterion_main!(benches);
